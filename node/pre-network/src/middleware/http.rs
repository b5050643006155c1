use std::time::Duration;

use async_trait::async_trait;
use umbral_pre::CapsuleFrag;

use crate::middleware::{MiddlewareError, RestMiddleware};
use crate::types::{
    Arrangement, ArrangementId, KFragPayload, MapId, NodeRecord, Revocation, WorkOrder,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP-over-TLS client for the proxy REST interface. Each request pins
/// the target node's own certificate as the root of trust; identity is
/// enforced separately through node record verification (cert CN).
pub struct HttpMiddleware {
    timeout: Duration,
}

impl Default for HttpMiddleware {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl HttpMiddleware {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client_for(&self, node: &NodeRecord) -> Result<reqwest::Client, MiddlewareError> {
        let certificate = reqwest::Certificate::from_pem(&node.certificate_pem)
            .map_err(|e| MiddlewareError::Malformed(format!("node certificate: {}", e)))?;
        reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(certificate)
            .timeout(self.timeout)
            .build()
            .map_err(|e| MiddlewareError::Malformed(format!("client: {}", e)))
    }

    // Bootstrap client: the caller has no record yet, so the TLS cert
    // cannot be pinned. The fetched record is verified before use.
    fn bootstrap_client(&self) -> Result<reqwest::Client, MiddlewareError> {
        reqwest::Client::builder()
            .use_rustls_tls()
            .danger_accept_invalid_certs(true)
            .timeout(self.timeout)
            .build()
            .map_err(|e| MiddlewareError::Malformed(format!("client: {}", e)))
    }
}

fn transport_error(e: reqwest::Error) -> MiddlewareError {
    if e.is_timeout() {
        MiddlewareError::ConnectTimeout(e.to_string())
    } else {
        MiddlewareError::NodeSeemsToBeDown(e.to_string())
    }
}

async fn unexpected(response: reqwest::Response) -> MiddlewareError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    MiddlewareError::UnexpectedResponse { status, body }
}

#[async_trait]
impl RestMiddleware for HttpMiddleware {
    async fn node_information(&self, host: &str, port: u16) -> Result<Vec<u8>, MiddlewareError> {
        let url = format!("https://{}:{}/public_information", host, port);
        let response = self
            .bootstrap_client()?
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        match response.status().as_u16() {
            200 => Ok(response.bytes().await.map_err(transport_error)?.to_vec()),
            _ => Err(unexpected(response).await),
        }
    }

    async fn ping(&self, node: &NodeRecord) -> Result<String, MiddlewareError> {
        let url = format!("{}/ping", node.rest_interface.uri());
        let response = self
            .client_for(node)?
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        match response.status().as_u16() {
            200 => response.text().await.map_err(transport_error),
            _ => Err(unexpected(response).await),
        }
    }

    async fn consider_arrangement(
        &self,
        node: &NodeRecord,
        arrangement: &Arrangement,
    ) -> Result<bool, MiddlewareError> {
        let url = format!("{}/consider_arrangement", node.rest_interface.uri());
        let response = self
            .client_for(node)?
            .post(url)
            .json(arrangement)
            .send()
            .await
            .map_err(transport_error)?;
        match response.status().as_u16() {
            200 => Ok(true),
            403 => Ok(false),
            _ => Err(unexpected(response).await),
        }
    }

    async fn put_kfrag(
        &self,
        node: &NodeRecord,
        arrangement_id: &ArrangementId,
        payload: &KFragPayload,
    ) -> Result<(), MiddlewareError> {
        let url = format!(
            "{}/kFrag/{}",
            node.rest_interface.uri(),
            arrangement_id.to_hex()
        );
        let response = self
            .client_for(node)?
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;
        match response.status().as_u16() {
            201 => Ok(()),
            404 => Err(MiddlewareError::NotFound(arrangement_id.to_hex())),
            _ => Err(unexpected(response).await),
        }
    }

    async fn put_treasure_map(
        &self,
        node: &NodeRecord,
        map_id: &MapId,
        map_bytes: &[u8],
    ) -> Result<(), MiddlewareError> {
        let url = format!("{}/treasure_map/{}", node.rest_interface.uri(), map_id);
        let response = self
            .client_for(node)?
            .post(url)
            .body(map_bytes.to_vec())
            .send()
            .await
            .map_err(transport_error)?;
        match response.status().as_u16() {
            201 => Ok(()),
            _ => Err(unexpected(response).await),
        }
    }

    async fn get_treasure_map(
        &self,
        node: &NodeRecord,
        map_id: &MapId,
    ) -> Result<Vec<u8>, MiddlewareError> {
        let url = format!("{}/treasure_map/{}", node.rest_interface.uri(), map_id);
        let response = self
            .client_for(node)?
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        match response.status().as_u16() {
            200 => Ok(response.bytes().await.map_err(transport_error)?.to_vec()),
            404 => Err(MiddlewareError::NotFound(map_id.to_string())),
            _ => Err(unexpected(response).await),
        }
    }

    async fn reencrypt(
        &self,
        node: &NodeRecord,
        work_order: &WorkOrder,
    ) -> Result<Vec<CapsuleFrag>, MiddlewareError> {
        let url = format!("{}/reencrypt", node.rest_interface.uri());
        let response = self
            .client_for(node)?
            .post(url)
            .json(work_order)
            .send()
            .await
            .map_err(transport_error)?;
        match response.status().as_u16() {
            200 => response
                .json::<Vec<CapsuleFrag>>()
                .await
                .map_err(|e| MiddlewareError::Malformed(format!("cfrag payload: {}", e))),
            404 => Err(MiddlewareError::NotFound(
                work_order.arrangement_id.to_hex(),
            )),
            _ => Err(unexpected(response).await),
        }
    }

    async fn revoke_arrangement(
        &self,
        node: &NodeRecord,
        revocation: &Revocation,
    ) -> Result<(), MiddlewareError> {
        let url = format!(
            "{}/kFrag/{}",
            node.rest_interface.uri(),
            revocation.arrangement_id.to_hex()
        );
        let response = self
            .client_for(node)?
            .delete(url)
            .json(revocation)
            .send()
            .await
            .map_err(transport_error)?;
        match response.status().as_u16() {
            200 => Ok(()),
            404 => Err(MiddlewareError::NotFound(
                revocation.arrangement_id.to_hex(),
            )),
            _ => Err(unexpected(response).await),
        }
    }
}
