//! HTTP/1.1 client for the Firecracker control socket.
//!
//! Firecracker exposes its configuration API over a Unix domain socket.
//! Every configuration call is a `PUT` with a JSON body; success is
//! `204 No Content`, anything else fails the request.

use crate::error::VmmError;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Host-imposed budget for one control call.
const API_CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ApiClient {
    socket: PathBuf,
    client: Client<UnixConnector, Full<Bytes>>,
}

impl ApiClient {
    pub fn new(socket: PathBuf) -> Self {
        Self {
            socket,
            client: Client::unix(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    pub async fn machine_config(&self, vcpu_count: u32, mem_size_mib: u32) -> Result<(), VmmError> {
        self.put(
            "/machine-config",
            json!({
                "vcpu_count": vcpu_count,
                "mem_size_mib": mem_size_mib,
                "smt": false,
            }),
        )
        .await
    }

    pub async fn boot_source(&self, kernel_image: &Path, boot_args: &str) -> Result<(), VmmError> {
        self.put(
            "/boot-source",
            json!({
                "kernel_image_path": kernel_image,
                "boot_args": boot_args,
            }),
        )
        .await
    }

    pub async fn drive(&self, id: &str, image: &Path, is_root: bool) -> Result<(), VmmError> {
        self.put(
            &format!("/drives/{id}"),
            json!({
                "drive_id": id,
                "path_on_host": image,
                "is_root_device": is_root,
                "is_read_only": false,
            }),
        )
        .await
    }

    pub async fn instance_start(&self) -> Result<(), VmmError> {
        self.put("/actions", json!({ "action_type": "InstanceStart" }))
            .await
    }

    async fn put(&self, endpoint: &str, body: Value) -> Result<(), VmmError> {
        let api_err = |message: String| VmmError::Api {
            endpoint: endpoint.to_string(),
            message,
        };

        let uri: hyper::Uri = Uri::new(&self.socket, endpoint).into();
        let request = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .map_err(|e| api_err(e.to_string()))?;

        let response = tokio::time::timeout(API_CALL_TIMEOUT, self.client.request(request))
            .await
            .map_err(|_| api_err("request timed out".to_string()))?
            .map_err(|e| api_err(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            let body = response
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            return Err(api_err(format!(
                "unexpected status {}: {}",
                status,
                String::from_utf8_lossy(&body).trim()
            )));
        }

        Ok(())
    }
}
