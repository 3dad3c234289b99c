use async_trait::async_trait;
use fissa_core::{
    gateway::{Gateway, GatewayError, Method, Response, Result},
    ApiConfig,
};
use log::debug;
use reqwest::{Client, Url};
use serde_json::Value;

/// A [Gateway] speaking HTTP to the session backend
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Url::parse(&config.url)
            .map_err(|e| GatewayError::Transport(format!("invalid api url {}: {}", config.url, e)))?;

        Ok(Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Response> {
        let url = self.url(path);

        let mut request = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        debug!("{} {} -> {}", method, path, status);

        if !status.is_success() {
            return Err(GatewayError::Http {
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Response {
            status: status.as_u16(),
            content: parse_body(&text),
        })
    }
}

/// Acknowledgements are sometimes plain text, so anything that isn't JSON is kept as a string
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }

    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod test {
    use fissa_core::{
        gateway::{Api, ErrorKind, Gateway, Method},
        ApiConfig, Pin,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{parse_body, HttpGateway};

    async fn gateway(server: &MockServer) -> HttpGateway {
        HttpGateway::new(&ApiConfig {
            url: format!("{}/api/", server.uri()),
        })
        .unwrap()
    }

    #[test]
    fn test_body_parsing() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("OK"), Value::String("OK".to_string()));
        assert_eq!(parse_body(r#"{"content":1}"#), json!({ "content": 1 }));
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = HttpGateway::new(&ApiConfig {
            url: "not a url".to_string(),
        });

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tracks_are_fetched_by_pin() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/room/track"))
            .and(query_param("pin", "ABCD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    { "id": "t1", "name": "One", "artists": ["A"], "durationMs": 1000, "index": 0 },
                    { "id": "t2", "name": "Two", "artists": ["B"], "durationMs": 2000, "index": 1 }
                ]
            })))
            .mount(&server)
            .await;

        let api = Api::new(Arc::new(gateway(&server).await));
        let tracks = api.tracks(&Pin::new("ABCD").unwrap()).await.unwrap();

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].name, "Two");
    }

    #[tokio::test]
    async fn test_missing_room_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/room/BADPIN"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gateway = gateway(&server).await;
        let error = gateway
            .request(Method::Get, "/room/BADPIN", None)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_play_conflict() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/room/play"))
            .and(body_json(json!({ "pin": "ABCD" })))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let api = Api::new(Arc::new(gateway(&server).await));
        let error = api.play(&Pin::new("ABCD").unwrap()).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_plain_text_acknowledgement_is_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/room/skip"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&server)
            .await;

        let api = Api::new(Arc::new(gateway(&server).await));

        assert!(api.skip(&Pin::new("ABCD").unwrap(), "u1").await.is_ok());
    }
}
