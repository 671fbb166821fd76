//! Bearer token resolution for Distribution registries.
//!
//! The registry is probed with an unauthenticated manifest GET; a 401 carries
//! a `WWW-Authenticate: Bearer` challenge naming the token realm. The token
//! is fetched once per pull and reused for the manifest and all blob calls.

use serde::Deserialize;
use url::Url;

use modelpull_core::manifest::MANIFEST_ACCEPT;

use crate::error::{RegistryError, RegistryResult};
use crate::transport::Transport;

/// A parsed `WWW-Authenticate: Bearer` challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

/// Token endpoint response; registries use either field name.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: String,
}

/// Manifest URL for `(repo, reference)` against a registry base.
#[must_use]
pub fn manifest_url(registry: &Url, repository: &str, reference: &str) -> String {
    format!(
        "{}/v2/{repository}/manifests/{reference}",
        registry.as_str().trim_end_matches('/')
    )
}

/// Parse a `WWW-Authenticate` header value into a bearer challenge.
pub fn parse_challenge(header: &str) -> RegistryResult<BearerChallenge> {
    let header = header.trim();
    let Some(params) = header
        .get(..7)
        .filter(|scheme| scheme.eq_ignore_ascii_case("bearer "))
        .map(|_| &header[7..])
    else {
        let scheme = header.split_whitespace().next().unwrap_or_default();
        return Err(RegistryError::Auth {
            message: format!("unsupported auth scheme {scheme:?}"),
        });
    };

    let mut realm = None;
    let mut service = None;
    let mut scope = None;

    for part in params.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim().to_lowercase().as_str() {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            "scope" => scope = Some(value),
            _ => {}
        }
    }

    let realm = realm.filter(|r| !r.is_empty()).ok_or(RegistryError::Auth {
        message: "challenge has no realm".to_string(),
    })?;

    Ok(BearerChallenge {
        realm,
        service: service.filter(|s| !s.is_empty()),
        scope: scope.filter(|s| !s.is_empty()),
    })
}

/// Resolve a bearer token for `(repository, reference)`.
///
/// Returns an empty string when the registry requires no auth.
pub async fn resolve_token(
    transport: &dyn Transport,
    registry: &Url,
    repository: &str,
    reference: &str,
) -> RegistryResult<String> {
    let probe_url = manifest_url(registry, repository, reference);
    let headers = vec![("Accept".to_string(), MANIFEST_ACCEPT.to_string())];
    let response = transport.get(&probe_url, &headers).await?;

    match response.status() {
        200 => Ok(String::new()),
        401 => {
            let challenge_header =
                response
                    .header("www-authenticate")
                    .ok_or(RegistryError::Auth {
                        message: "401 without WWW-Authenticate header".to_string(),
                    })?;
            let challenge = parse_challenge(challenge_header)?;
            fetch_token(transport, &challenge, repository).await
        }
        status => Err(RegistryError::Auth {
            message: format!("unexpected status {status} probing auth"),
        }),
    }
}

/// Fetch a token from the challenge's realm.
async fn fetch_token(
    transport: &dyn Transport,
    challenge: &BearerChallenge,
    repository: &str,
) -> RegistryResult<String> {
    let mut realm = Url::parse(&challenge.realm).map_err(|e| RegistryError::Auth {
        message: format!("invalid realm URL {:?}: {e}", challenge.realm),
    })?;

    let scope = challenge
        .scope
        .clone()
        .unwrap_or_else(|| format!("repository:{repository}:pull"));
    {
        let mut query = realm.query_pairs_mut();
        if let Some(service) = &challenge.service {
            query.append_pair("service", service);
        }
        query.append_pair("scope", &scope);
    }

    tracing::debug!(realm = %realm, "fetching bearer token");
    let response = transport.get(realm.as_str(), &[]).await?;
    if response.status() != 200 {
        return Err(RegistryError::Auth {
            message: format!("token endpoint returned status {}", response.status()),
        });
    }

    let body: TokenResponse = response.json().await?;
    let token = if body.token.is_empty() {
        body.access_token
    } else {
        body.token
    };
    if token.is_empty() {
        return Err(RegistryError::Auth {
            message: "token endpoint returned an empty token".to_string(),
        });
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{CannedResponse, FakeTransport};

    fn registry() -> Url {
        Url::parse("https://reg.example").unwrap()
    }

    #[test]
    fn parses_full_challenge() {
        let challenge = parse_challenge(
            r#"Bearer realm="https://auth.example/token",service="reg",scope="repository:library/m:pull""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.example/token");
        assert_eq!(challenge.service.as_deref(), Some("reg"));
        assert_eq!(challenge.scope.as_deref(), Some("repository:library/m:pull"));
    }

    #[test]
    fn challenge_scheme_is_case_insensitive() {
        let challenge = parse_challenge(r#"bearer realm="https://a.example/t""#).unwrap();
        assert_eq!(challenge.realm, "https://a.example/t");
        assert!(challenge.service.is_none());
        assert!(challenge.scope.is_none());
    }

    #[test]
    fn basic_scheme_is_rejected() {
        let err = parse_challenge(r#"Basic realm="x""#).unwrap_err();
        assert!(err.to_string().contains("unsupported auth scheme"));
    }

    #[test]
    fn missing_realm_is_rejected() {
        let err = parse_challenge(r#"Bearer service="reg""#).unwrap_err();
        assert!(err.to_string().contains("no realm"));
    }

    #[tokio::test]
    async fn open_registry_yields_empty_token() {
        let transport = FakeTransport::new().on("/manifests/", CannedResponse::ok("{}"));
        let token = resolve_token(&transport, &registry(), "library/m", "latest")
            .await
            .unwrap();
        assert!(token.is_empty());
    }

    #[tokio::test]
    async fn challenge_flow_fetches_token() {
        let transport = FakeTransport::new()
            .on(
                "/manifests/",
                CannedResponse::status(401).with_header(
                    "WWW-Authenticate",
                    r#"Bearer realm="https://auth.example/token",service="reg""#,
                ),
            )
            .on("auth.example/token", CannedResponse::ok(r#"{"token":"T"}"#));

        let token = resolve_token(&transport, &registry(), "library/m", "latest")
            .await
            .unwrap();
        assert_eq!(token, "T");

        // no scope in the challenge: defaulted to repository:<repo>:pull
        let token_requests = transport.requests_matching("auth.example");
        assert_eq!(token_requests.len(), 1);
        assert!(token_requests[0].url.contains("service=reg"));
        assert!(token_requests[0]
            .url
            .contains("scope=repository%3Alibrary%2Fm%3Apull"));
    }

    #[tokio::test]
    async fn access_token_field_is_accepted() {
        let transport = FakeTransport::new()
            .on(
                "/manifests/",
                CannedResponse::status(401)
                    .with_header("Www-Authenticate", r#"Bearer realm="https://a.example/t""#),
            )
            .on("a.example/t", CannedResponse::ok(r#"{"access_token":"A"}"#));

        let token = resolve_token(&transport, &registry(), "library/m", "latest")
            .await
            .unwrap();
        assert_eq!(token, "A");
    }

    #[tokio::test]
    async fn empty_token_is_an_error() {
        let transport = FakeTransport::new()
            .on(
                "/manifests/",
                CannedResponse::status(401)
                    .with_header("WWW-Authenticate", r#"Bearer realm="https://a.example/t""#),
            )
            .on("a.example/t", CannedResponse::ok("{}"));

        let err = resolve_token(&transport, &registry(), "library/m", "latest")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty token"));
    }

    #[tokio::test]
    async fn unexpected_probe_status_is_fatal() {
        let transport = FakeTransport::new().on("/manifests/", CannedResponse::status(403));
        let err = resolve_token(&transport, &registry(), "library/m", "latest")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unexpected status"));
    }

    #[test]
    fn manifest_url_shape() {
        assert_eq!(
            manifest_url(&registry(), "library/m", "latest"),
            "https://reg.example/v2/library/m/manifests/latest"
        );
    }
}
