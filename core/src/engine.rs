//! The request engine: one descriptor in, one settled result out.
//!
//! # Design
//! [`send`] is a pure function of a configuration snapshot and a descriptor.
//! All assembly — URL, query, payload, auth, headers — happens before the
//! single transport suspension point; classification happens after it. The
//! engine never retries and carries no timer: callers compose deadlines by
//! racing the returned handle against a clock and cancelling.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cancelable::CancelableRequest;
use crate::config::{Config, CredentialsMode};
use crate::error::ApiError;
use crate::request::{Descriptor, FormValue, Method, QueryValue};

/// Characters escaped the way `encodeURIComponent` escapes them: everything
/// except alphanumerics and `- _ . ! ~ * ' ( )`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// Issue one API call. Takes a snapshot of `config`, so a configuration
/// mutation racing this call is only observed by calls issued after it.
///
/// Must be called within a tokio runtime; the transport runs on a spawned
/// task owned by the returned handle.
pub fn send<T>(config: &Config, descriptor: Descriptor) -> CancelableRequest<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let snapshot = config.clone();
    CancelableRequest::spawn(async move { perform(snapshot, descriptor).await })
}

/// Issue one API call and settle with the raw response body, bypassing the
/// typed decode. This is the path for binary content (media downloads,
/// archive exports) that a text decode would mangle.
pub fn send_bytes(config: &Config, descriptor: Descriptor) -> CancelableRequest<Vec<u8>> {
    let snapshot = config.clone();
    CancelableRequest::spawn(async move {
        perform_raw(snapshot, descriptor)
            .await
            .map(|(_, body)| body)
    })
}

async fn perform<T: DeserializeOwned>(
    config: Config,
    descriptor: Descriptor,
) -> Result<T, ApiError> {
    let (content_type, body) = perform_raw(config, descriptor).await?;
    decode(&content_type, &body)
}

async fn perform_raw(
    config: Config,
    descriptor: Descriptor,
) -> Result<(String, Vec<u8>), ApiError> {
    let url = build_url(&config, &descriptor)?;
    let payload = build_payload(&descriptor)?;
    let headers = assemble_headers(&config, &descriptor).await?;

    tracing::debug!(method = %descriptor.method, %url, "dispatching request");

    let client = transport_client(&config)?;
    let mut request = client
        .request(descriptor.method.into(), &url)
        .headers(headers);

    // Computed auth is applied after the header merge and wins over a
    // per-call Authorization header.
    match config.token.resolve(&descriptor).await {
        Some(token) if !token.is_empty() => request = request.bearer_auth(token),
        _ => {
            let username = config.username.resolve(&descriptor).await;
            let password = config.password.resolve(&descriptor).await;
            if let (Some(username), Some(password)) = (username, password) {
                if !username.is_empty() && !password.is_empty() {
                    request = request.basic_auth(username, Some(password));
                }
            }
        }
    }

    request = match payload {
        Payload::None => request,
        Payload::Json { media_type, body } => {
            request.header(CONTENT_TYPE, media_type).body(body)
        }
        Payload::Multipart(form) => request.multipart(form),
    };

    let response = request
        .send()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;

    classify(response, &descriptor).await
}

/// Assemble `base + template` with every `{name}` token substituted from the
/// path map (`{api-version}` comes from the config), then append the query.
fn build_url(config: &Config, descriptor: &Descriptor) -> Result<String, ApiError> {
    let mut path = String::with_capacity(descriptor.url.len());
    let mut rest = descriptor.url.as_str();

    while let Some(open) = rest.find('{') {
        path.push_str(&rest[..open]);
        let Some(close) = rest[open..].find('}') else {
            return Err(ApiError::Validation(format!(
                "unterminated path token in template {}",
                descriptor.url
            )));
        };
        let name = &rest[open + 1..open + close];
        let raw = if name == "api-version" {
            &config.version
        } else {
            descriptor.path.get(name).ok_or_else(|| {
                ApiError::Validation(format!("no path parameter for token {{{name}}}"))
            })?
        };
        path.push_str(&encode_segment(config, raw));
        rest = &rest[open + close + 1..];
    }
    path.push_str(rest);

    let mut url = format!("{}{}", config.base.trim_end_matches('/'), path);
    let query = build_query(&descriptor.query);
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query);
    }
    Ok(url)
}

fn encode_segment(config: &Config, raw: &str) -> String {
    match &config.encode_path {
        Some(hook) => hook(raw),
        None => utf8_percent_encode(raw, COMPONENT).to_string(),
    }
}

/// Serialize query pairs in declared order. `Absent` keys are dropped, lists
/// produce one repeated pair per element.
fn build_query(pairs: &[(String, QueryValue)]) -> String {
    let mut out: Vec<String> = Vec::new();
    for (key, value) in pairs {
        match value {
            QueryValue::Absent => {}
            QueryValue::Scalar(v) => out.push(format!(
                "{}={}",
                utf8_percent_encode(key, COMPONENT),
                utf8_percent_encode(v, COMPONENT)
            )),
            QueryValue::List(vs) => out.extend(vs.iter().map(|v| {
                format!(
                    "{}={}",
                    utf8_percent_encode(key, COMPONENT),
                    utf8_percent_encode(v, COMPONENT)
                )
            })),
        }
    }
    out.join("&")
}

#[derive(Debug)]
enum Payload {
    None,
    Json {
        media_type: HeaderValue,
        body: String,
    },
    Multipart(reqwest::multipart::Form),
}

/// Exactly one of: no payload, a JSON body, or multipart form fields.
fn build_payload(descriptor: &Descriptor) -> Result<Payload, ApiError> {
    if descriptor.body.is_some() && !descriptor.form.is_empty() {
        return Err(ApiError::Validation(
            "descriptor carries both a body and form fields".to_string(),
        ));
    }

    if let Some(body) = &descriptor.body {
        let media_type = descriptor.media_type.as_deref().unwrap_or("application/json");
        let media_type = HeaderValue::from_str(media_type)
            .map_err(|_| ApiError::Validation(format!("invalid media type {media_type}")))?;
        let body = serde_json::to_string(body)
            .map_err(|e| ApiError::Validation(format!("body serialization failed: {e}")))?;
        return Ok(Payload::Json { media_type, body });
    }

    if !descriptor.form.is_empty() {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in &descriptor.form {
            form = match value {
                FormValue::Text(text) => form.text(name.clone(), text.clone()),
                FormValue::File {
                    file_name,
                    content_type,
                    data,
                } => {
                    let mut part = reqwest::multipart::Part::bytes(data.clone())
                        .file_name(file_name.clone());
                    if let Some(content_type) = content_type {
                        part = part.mime_str(content_type).map_err(|_| {
                            ApiError::Validation(format!(
                                "invalid content type {content_type} for part {name}"
                            ))
                        })?;
                    }
                    form.part(name.clone(), part)
                }
            };
        }
        return Ok(Payload::Multipart(form));
    }

    Ok(Payload::None)
}

/// Resolve global headers and merge the descriptor's own under them —
/// the per-call header wins on a case-insensitive name collision.
async fn assemble_headers(
    config: &Config,
    descriptor: &Descriptor,
) -> Result<HeaderMap, ApiError> {
    let mut merged: Vec<(String, String)> = Vec::new();
    for (name, value) in config.headers.resolve(descriptor).await {
        upsert(&mut merged, name, value);
    }
    for (name, value) in &descriptor.headers {
        upsert(&mut merged, name.clone(), value.clone());
    }

    let mut headers = HeaderMap::with_capacity(merged.len());
    for (name, value) in merged {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ApiError::Validation(format!("invalid header name {name}")))?;
        let header_value = HeaderValue::from_str(&value)
            .map_err(|_| ApiError::Validation(format!("invalid value for header {name}")))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

fn upsert(entries: &mut Vec<(String, String)>, name: String, value: String) {
    match entries
        .iter_mut()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
    {
        Some((_, slot)) => *slot = value,
        None => entries.push((name, value)),
    }
}

/// The shared per-config client for the configured credentials mode, so the
/// cookie jar and connection pool are ambient across calls rather than
/// rebuilt per request.
fn transport_client(config: &Config) -> Result<reqwest::Client, ApiError> {
    let ambient = config.with_credentials && config.credentials_mode != CredentialsMode::Omit;
    config.transport.client(ambient)
}

/// Map the transport outcome onto the result: 2xx responses pass their body
/// and content type through, everything else is a `Status` error carrying
/// the descriptor's message for that code when one exists.
async fn classify(
    response: reqwest::Response,
    descriptor: &Descriptor,
) -> Result<(String, Vec<u8>), ApiError> {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;

    if !(200..300).contains(&status) {
        tracing::debug!(status, "request rejected by server");
        let message = descriptor
            .errors
            .get(&status)
            .cloned()
            .unwrap_or_else(|| format!("request failed with status {status}"));
        return Err(ApiError::Status {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            message,
        });
    }

    Ok((content_type, bytes.to_vec()))
}

/// Content-type-driven decode into the declared shape. An empty body decodes
/// as null so `T = ()` works for 204-style responses; non-JSON bodies pass
/// through as text, and a body that is not valid UTF-8 is a `Decode` error
/// rather than being silently mangled — binary content goes through
/// [`send_bytes`].
fn decode<T: DeserializeOwned>(content_type: &str, body: &[u8]) -> Result<T, ApiError> {
    let value = if body.is_empty() {
        Value::Null
    } else if content_type.contains("json") {
        serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))?
    } else {
        let text = std::str::from_utf8(body).map_err(|_| {
            ApiError::Decode(
                "response body is not valid UTF-8 text; fetch binary content with send_bytes"
                    .to_string(),
            )
        })?;
        Value::String(text.to_string())
    };
    serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Resolvable;

    fn config() -> Config {
        Config::new("http://localhost:3000")
    }

    #[test]
    fn substitutes_path_tokens() {
        let descriptor = Descriptor::new(Method::Get, "/campaigns/{id}/tiers/{tier}")
            .with_path("id", 42)
            .with_path("tier", "gold");
        let url = build_url(&config(), &descriptor).unwrap();
        assert_eq!(url, "http://localhost:3000/campaigns/42/tiers/gold");
    }

    #[test]
    fn api_version_token_comes_from_config() {
        let mut config = config();
        config.version = "v2".to_string();
        let descriptor = Descriptor::new(Method::Get, "/{api-version}/campaigns");
        let url = build_url(&config, &descriptor).unwrap();
        assert_eq!(url, "http://localhost:3000/v2/campaigns");
    }

    #[test]
    fn unmapped_token_is_a_validation_error() {
        let descriptor = Descriptor::new(Method::Get, "/campaigns/{id}");
        let err = build_url(&config(), &descriptor).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(err.to_string().contains("{id}"));
    }

    #[test]
    fn unterminated_token_is_a_validation_error() {
        let descriptor = Descriptor::new(Method::Get, "/campaigns/{id");
        let err = build_url(&config(), &descriptor).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn path_values_are_percent_encoded_by_default() {
        let descriptor =
            Descriptor::new(Method::Get, "/files/{name}").with_path("name", "a/b c");
        let url = build_url(&config(), &descriptor).unwrap();
        assert_eq!(url, "http://localhost:3000/files/a%2Fb%20c");
    }

    #[test]
    fn encode_path_hook_replaces_default_encoding() {
        let mut config = config();
        config.encode_path = Some(Arc::new(|segment: &str| segment.to_string()));
        let descriptor =
            Descriptor::new(Method::Get, "/files/{name}").with_path("name", "a/b");
        let url = build_url(&config, &descriptor).unwrap();
        assert_eq!(url, "http://localhost:3000/files/a/b");
    }

    #[test]
    fn trailing_base_slash_is_trimmed() {
        let config = Config::new("http://localhost:3000///");
        let descriptor = Descriptor::new(Method::Get, "/ping");
        let url = build_url(&config, &descriptor).unwrap();
        assert_eq!(url, "http://localhost:3000/ping");
    }

    #[test]
    fn absent_query_keys_never_serialize() {
        let descriptor = Descriptor::new(Method::Get, "/campaigns")
            .with_query("status", Option::<String>::None)
            .with_query("tag", "x");
        let url = build_url(&config(), &descriptor).unwrap();
        assert_eq!(url, "http://localhost:3000/campaigns?tag=x");
    }

    #[test]
    fn list_query_repeats_the_key_in_order() {
        let descriptor = Descriptor::new(Method::Get, "/campaigns")
            .with_query("tag", vec!["zine", "art"])
            .with_query("page", 2);
        assert_eq!(
            build_query(&descriptor.query),
            "tag=zine&tag=art&page=2"
        );
    }

    #[test]
    fn query_keys_keep_declared_order() {
        let descriptor = Descriptor::new(Method::Get, "/campaigns")
            .with_query("z", "1")
            .with_query("a", "2");
        assert_eq!(build_query(&descriptor.query), "z=1&a=2");
    }

    #[test]
    fn query_values_are_percent_encoded() {
        let descriptor =
            Descriptor::new(Method::Get, "/search").with_query("q", "space zines & more");
        assert_eq!(
            build_query(&descriptor.query),
            "q=space%20zines%20%26%20more"
        );
    }

    #[test]
    fn empty_scalar_still_serializes() {
        let descriptor = Descriptor::new(Method::Get, "/campaigns").with_query("cursor", "");
        assert_eq!(build_query(&descriptor.query), "cursor=");
    }

    #[test]
    fn body_and_form_together_fail_fast() {
        let descriptor = Descriptor::new(Method::Post, "/campaigns")
            .with_body(serde_json::json!({"title": "x"}))
            .with_form_field("poster", FormValue::Text("y".to_string()));
        let err = build_payload(&descriptor).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn body_defaults_to_json_media_type() {
        let descriptor =
            Descriptor::new(Method::Post, "/campaigns").with_body(serde_json::json!({"a": 1}));
        match build_payload(&descriptor).unwrap() {
            Payload::Json { media_type, body } => {
                assert_eq!(media_type, "application/json");
                assert_eq!(body, r#"{"a":1}"#);
            }
            _ => panic!("expected a JSON payload"),
        }
    }

    #[test]
    fn explicit_media_type_is_kept() {
        let descriptor = Descriptor::new(Method::Post, "/campaigns")
            .with_body(serde_json::json!({"a": 1}))
            .with_media_type("application/vnd.platform+json");
        match build_payload(&descriptor).unwrap() {
            Payload::Json { media_type, .. } => {
                assert_eq!(media_type, "application/vnd.platform+json");
            }
            _ => panic!("expected a JSON payload"),
        }
    }

    #[test]
    fn form_fields_build_a_multipart_payload() {
        let descriptor = Descriptor::new(Method::Post, "/media")
            .with_form_field("caption", FormValue::Text("studio tour".to_string()))
            .with_form_field(
                "poster",
                FormValue::File {
                    file_name: "poster.png".to_string(),
                    content_type: Some("image/png".to_string()),
                    data: vec![0x89, 0x50, 0x4e, 0x47],
                },
            );
        assert!(matches!(
            build_payload(&descriptor).unwrap(),
            Payload::Multipart(_)
        ));
    }

    #[test]
    fn no_payload_when_descriptor_has_neither() {
        let descriptor = Descriptor::new(Method::Get, "/campaigns");
        assert!(matches!(build_payload(&descriptor).unwrap(), Payload::None));
    }

    #[test]
    fn empty_body_decodes_to_unit() {
        decode::<()>("", &[]).unwrap();
    }

    #[test]
    fn json_body_decodes_into_the_declared_shape() {
        let decoded: Vec<u64> = decode("application/json", b"[5,10,25]").unwrap();
        assert_eq!(decoded, vec![5, 10, 25]);
    }

    #[test]
    fn text_body_passes_through_as_string() {
        let decoded: String = decode("text/plain; charset=utf-8", b"backed!").unwrap();
        assert_eq!(decoded, "backed!");
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = decode::<Value>("application/json", b"not json").unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn invalid_utf8_is_a_decode_error_not_mangled_text() {
        let err = decode::<String>("application/octet-stream", &[0x89, 0x50, 0xff]).unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[tokio::test]
    async fn per_call_header_overrides_global() {
        let mut config = config();
        config.headers = Resolvable::value(vec![
            ("X-Client".to_string(), "global".to_string()),
            ("X-Trace".to_string(), "keep".to_string()),
        ]);
        let descriptor =
            Descriptor::new(Method::Get, "/campaigns").with_header("x-client", "per-call");

        let headers = assemble_headers(&config, &descriptor).await.unwrap();
        assert_eq!(headers.get("x-client").unwrap(), "per-call");
        assert_eq!(headers.get("x-trace").unwrap(), "keep");
        assert_eq!(headers.len(), 2);
    }

    #[tokio::test]
    async fn resolved_global_headers_see_the_descriptor() {
        let mut config = config();
        config.headers = Resolvable::resolver(|d: &Descriptor| {
            vec![("X-Operation".to_string(), d.url.clone())]
        });
        let descriptor = Descriptor::new(Method::Get, "/campaigns");

        let headers = assemble_headers(&config, &descriptor).await.unwrap();
        assert_eq!(headers.get("x-operation").unwrap(), "/campaigns");
    }

    #[tokio::test]
    async fn invalid_header_name_is_a_validation_error() {
        let descriptor =
            Descriptor::new(Method::Get, "/campaigns").with_header("bad header", "x");
        let err = assemble_headers(&config(), &descriptor).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
