//! `fetch`-backed [`Transport`].

use expwidget_core::{Transport, TransportError};
use js_sys::Uint8Array;
use serde_json::Value;
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Headers, Request, RequestCredentials, RequestInit, RequestMode, Response};

fn js_error(value: JsValue) -> TransportError {
    TransportError::Network(value.as_string().unwrap_or_else(|| format!("{value:?}")))
}

/// Client for the experiment service rooted at `data-api-base`.
#[derive(Debug, Clone)]
pub struct FetchTransport {
    base: String,
}

impl FetchTransport {
    /// Client for `base`. A trailing slash is ignored.
    #[must_use]
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Absolute URL of a service path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        keepalive: bool,
    ) -> Result<Request, TransportError> {
        let init = RequestInit::new();
        init.set_method(method);
        init.set_mode(RequestMode::Cors);
        init.set_credentials(RequestCredentials::Omit);
        init.set_keepalive(keepalive);

        let headers = Headers::new().map_err(js_error)?;
        headers.set("Accept", "application/json").map_err(js_error)?;
        if let Some(body) = body {
            headers.set("Content-Type", "application/json").map_err(js_error)?;
            init.set_body(&JsValue::from_str(&body.to_string()));
        }
        init.set_headers(&headers);

        Request::new_with_str_and_init(&self.url(path), &init).map_err(js_error)
    }

    async fn send(request: Request) -> Result<Response, TransportError> {
        let window = web_sys::window().ok_or(TransportError::Unsupported)?;
        let response = JsFuture::from(window.fetch_with_request(&request))
            .await
            .map_err(js_error)?;
        response
            .dyn_into::<Response>()
            .map_err(|_| TransportError::Decode("fetch did not return a Response".into()))
    }

    async fn text(response: &Response) -> Result<String, TransportError> {
        let text = JsFuture::from(response.text().map_err(js_error)?)
            .await
            .map_err(js_error)?;
        text.as_string()
            .ok_or_else(|| TransportError::Decode("response body is not text".into()))
    }

    async fn json(response: &Response) -> Result<Value, TransportError> {
        let text = Self::text(response).await?;
        serde_json::from_str(&text).map_err(|err| TransportError::Decode(err.to_string()))
    }

    async fn call(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, TransportError> {
        let response = Self::send(self.request(method, path, body, false)?).await?;
        if response.ok() {
            debug!(method, path, status = response.status(), "request succeeded");
            return Self::json(&response).await;
        }

        let mut status_text = response.status_text();
        if body.is_some() {
            // POST failures carry the server's explanation
            if let Ok(detail) = Self::text(&response).await {
                if !detail.is_empty() {
                    status_text = format!("{status_text} - {detail}");
                }
            }
        }
        Err(TransportError::Status {
            status: response.status(),
            status_text,
        })
    }
}

impl Transport for FetchTransport {
    async fn get(&self, path: &str) -> Result<Value, TransportError> {
        self.call("GET", path, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        self.call("POST", path, Some(body)).await
    }

    fn send_fire_and_forget(&self, path: &str, body: &Value) -> bool {
        let request = match self.request("POST", path, Some(body), true) {
            Ok(request) => request,
            Err(err) => {
                warn!(path, error = %err, "could not build beacon");
                return false;
            }
        };
        let path = path.to_string();
        wasm_bindgen_futures::spawn_local(async move {
            match Self::send(request).await {
                Ok(response) if !response.ok() => {
                    warn!(path, status = response.status(), "beacon rejected");
                }
                Ok(_) => {}
                Err(err) => warn!(path, error = %err, "beacon failed"),
            }
        });
        true
    }

    async fn fetch_image_data(&self, url: &str) -> Result<String, TransportError> {
        let init = RequestInit::new();
        init.set_method("GET");
        init.set_mode(RequestMode::Cors);
        init.set_credentials(RequestCredentials::Omit);
        let request = Request::new_with_str_and_init(url, &init).map_err(js_error)?;

        let response = Self::send(request).await?;
        if !response.ok() {
            return Err(TransportError::Status {
                status: response.status(),
                status_text: response.status_text(),
            });
        }
        let mime = response
            .headers()
            .get("content-type")
            .ok()
            .flatten()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let buffer = JsFuture::from(response.array_buffer().map_err(js_error)?)
            .await
            .map_err(js_error)?;
        let bytes = Uint8Array::new(&buffer).to_vec();

        let window = web_sys::window().ok_or(TransportError::Unsupported)?;
        let encoded = window.btoa(&latin1(&bytes)).map_err(js_error)?;
        Ok(data_url(&mime, &encoded))
    }
}

/// Byte-per-char string, the input `btoa` expects.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

fn data_url(mime: &str, base64: &str) -> String {
    let mime = mime.split(';').next().unwrap_or(mime).trim();
    format!("data:{mime};base64,{base64}")
}

#[cfg(test)]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_url_joins_base() {
        let transport = FetchTransport::new("https://api.example.com/");
        assert_eq!(
            transport.url("/experiments/e/hit"),
            "https://api.example.com/experiments/e/hit"
        );
    }

    #[wasm_bindgen_test]
    fn test_data_url() {
        assert_eq!(latin1(&[0x41, 0xff]), "A\u{ff}");
        assert_eq!(
            data_url("image/png; charset=binary", "AAA="),
            "data:image/png;base64,AAA="
        );
    }

    #[wasm_bindgen_test]
    fn test_request_shape() {
        let transport = FetchTransport::new("https://api.example.com");
        let body = serde_json::json!({"creative_id": 7});
        let request = transport
            .request("POST", "/experiments/e/click", Some(&body), true)
            .unwrap();
        assert_eq!(request.method(), "POST");
        assert_eq!(request.url(), "https://api.example.com/experiments/e/click");
        assert_eq!(
            request.headers().get("content-type").unwrap().as_deref(),
            Some("application/json")
        );
    }

    #[wasm_bindgen_test]
    async fn test_unreachable_host_is_network_error() {
        let transport = FetchTransport::new("http://127.0.0.1:1");
        let err = transport.get("/nothing").await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }
}
