//! Generator backends — the external collaborators that turn one input file
//! into a generated artifact.
//!
//! The supported backends are enumerated explicitly in [`AnyGenerator`] and
//! selected by a string key from config, so the set is statically checkable.
//! No wire protocol is specified beyond the minimal contract the built-in
//! HTTP client needs: submit input, get back delivery URLs or an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::config::BatchConfig;
use crate::error::{GeneratorError, PipelineError};

/// Where a generation landed: one or more artifact files under the task's
/// output directory, plus the backend's own identifier when it has one.
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub paths: Vec<PathBuf>,
    pub generation_id: Option<String>,
}

/// The generator capability: submit one input, get back an artifact
/// reference or an error. Implemented by real backends and by test doubles.
pub trait Generate {
    fn generate(
        &self,
        input: &Path,
        effect: &str,
        params: &serde_json::Map<String, serde_json::Value>,
        output_dir: &Path,
    ) -> impl std::future::Future<Output = Result<GeneratedArtifact, GeneratorError>> + Send;
}

/// Closed set of configured backends, keyed by the `generator` config field.
#[derive(Debug)]
pub enum AnyGenerator {
    Http(HttpGenerator),
    Command(CommandGenerator),
}

impl AnyGenerator {
    /// Build the backend named by the config. Unknown keys fail here, at
    /// startup, not at dispatch time.
    pub fn from_config(config: &BatchConfig) -> Result<Self, PipelineError> {
        match config.generator.as_str() {
            "http" => {
                if config.endpoint.is_empty() {
                    return Err(PipelineError::Config(
                        "http generator requires `endpoint`".to_string(),
                    ));
                }
                Ok(AnyGenerator::Http(HttpGenerator::new(
                    config.api_key.clone(),
                    config.endpoint.clone(),
                )))
            }
            "command" => {
                if config.command.is_empty() {
                    return Err(PipelineError::Config(
                        "command generator requires `command`".to_string(),
                    ));
                }
                Ok(AnyGenerator::Command(CommandGenerator::new(
                    config.command.clone(),
                )))
            }
            other => Err(PipelineError::Config(format!(
                "unknown generator backend: {other:?} (expected \"http\" or \"command\")"
            ))),
        }
    }
}

impl Generate for AnyGenerator {
    async fn generate(
        &self,
        input: &Path,
        effect: &str,
        params: &serde_json::Map<String, serde_json::Value>,
        output_dir: &Path,
    ) -> Result<GeneratedArtifact, GeneratorError> {
        match self {
            AnyGenerator::Http(g) => g.generate(input, effect, params, output_dir).await,
            AnyGenerator::Command(g) => g.generate(input, effect, params, output_dir).await,
        }
    }
}

/// Response body of the generation endpoint.
#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    generation_id: Option<String>,
    /// Delivery URLs in preference order: primary first, alternates after.
    #[serde(default)]
    urls: Vec<String>,
}

/// HTTP generation backend.
#[derive(Debug)]
pub struct HttpGenerator {
    api_key: String,
    client: Client,
    base_url: String,
}

impl HttpGenerator {
    pub fn new(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()
            .expect("failed to build HTTP client");
        Self {
            api_key,
            client,
            base_url,
        }
    }

    async fn submit(
        &self,
        input: &Path,
        effect: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<GenerationResponse, GeneratorError> {
        let bytes = tokio::fs::read(input).await?;
        let file_name = input
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("input")
            .to_string();

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("content-type", "application/octet-stream")
            .header(
                "x-generation-params",
                serde_json::to_string(params)
                    .map_err(|e| GeneratorError::ParseError(e.to_string()))?,
            )
            .query(&[("filename", file_name.as_str()), ("effect", effect)])
            .body(bytes)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(GeneratorError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GeneratorError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<GenerationResponse>().await?;
        Ok(body)
    }

    /// Download the artifact from the first delivery URL that answers.
    /// Exhausting every URL is a failed attempt, not a partial success.
    async fn fetch_artifact(
        &self,
        urls: &[String],
        input: &Path,
        effect: &str,
        output_dir: &Path,
    ) -> Result<PathBuf, GeneratorError> {
        let mut last_err = String::from("no delivery URLs offered");

        for url in urls {
            match self.try_fetch(url).await {
                Ok(bytes) => {
                    let name = artifact_file_name(url, input, effect);
                    let dest = output_dir.join(name);
                    tokio::fs::write(&dest, bytes).await?;
                    return Ok(dest);
                }
                Err(e) => last_err = format!("{url}: {e}"),
            }
        }

        Err(GeneratorError::ArtifactUnavailable(last_err))
    }

    async fn try_fetch(&self, url: &str) -> Result<Vec<u8>, GeneratorError> {
        let response = self
            .client
            .get(url)
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GeneratorError::ApiError {
                status: response.status().as_u16(),
                message: "artifact fetch failed".to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

impl Generate for HttpGenerator {
    async fn generate(
        &self,
        input: &Path,
        effect: &str,
        params: &serde_json::Map<String, serde_json::Value>,
        output_dir: &Path,
    ) -> Result<GeneratedArtifact, GeneratorError> {
        let body = self.submit(input, effect, params).await?;

        // In-band failure is the same signal as a transport failure.
        if !body.success {
            return Err(GeneratorError::InBand(
                body.error.unwrap_or_else(|| "unspecified error".to_string()),
            ));
        }

        let path = self
            .fetch_artifact(&body.urls, input, effect, output_dir)
            .await?;

        Ok(GeneratedArtifact {
            paths: vec![path],
            generation_id: body.generation_id,
        })
    }
}

/// Derive the artifact's local filename: the delivery URL's basename when it
/// has one, otherwise a stem+effect fallback.
fn artifact_file_name(url: &str, input: &Path, effect: &str) -> String {
    let from_url = url
        .rsplit('/')
        .next()
        .map(|s| s.split('?').next().unwrap_or(s))
        .filter(|s| !s.is_empty() && s.contains('.'));
    match from_url {
        Some(name) => name.to_string(),
        None => {
            let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("input");
            let safe_effect = effect.to_lowercase().replace([' ', '-'], "_");
            format!("{stem}_{safe_effect}_generated.bin")
        }
    }
}

/// Local subprocess backend: runs a configured program once per input with
/// the input path, output directory, effect, and params JSON as arguments.
#[derive(Debug)]
pub struct CommandGenerator {
    program: String,
}

impl CommandGenerator {
    pub fn new(program: String) -> Self {
        Self { program }
    }
}

impl Generate for CommandGenerator {
    async fn generate(
        &self,
        input: &Path,
        effect: &str,
        params: &serde_json::Map<String, serde_json::Value>,
        output_dir: &Path,
    ) -> Result<GeneratedArtifact, GeneratorError> {
        let params_json = serde_json::to_string(params)
            .map_err(|e| GeneratorError::ParseError(e.to_string()))?;

        let before: std::collections::HashSet<PathBuf> = list_dir(output_dir);

        let output = tokio::process::Command::new(&self.program)
            .arg(input)
            .arg(output_dir)
            .arg(effect)
            .arg(&params_json)
            .output()
            .await?;

        if !output.status.success() {
            return Err(GeneratorError::InBand(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        // The program names its outputs however it likes; anything new in
        // the output directory is the artifact.
        let after = list_dir(output_dir);
        let new_paths: Vec<PathBuf> = after.difference(&before).cloned().collect();
        if new_paths.is_empty() {
            return Err(GeneratorError::ArtifactUnavailable(format!(
                "{} exited 0 but wrote nothing to {}",
                self.program,
                output_dir.display()
            )));
        }

        Ok(GeneratedArtifact {
            paths: new_paths,
            generation_id: None,
        })
    }
}

fn list_dir(dir: &Path) -> std::collections::HashSet<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params() -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("prompt".into(), serde_json::Value::String("waves".into()));
        map
    }

    async fn write_input(dir: &Path) -> PathBuf {
        let input = dir.join("sunset.jpg");
        tokio::fs::write(&input, b"jpegbytes").await.unwrap();
        input
    }

    #[test]
    fn unknown_backend_key_is_a_config_error() {
        let config = BatchConfig {
            generator: "telepathy".into(),
            ..Default::default()
        };
        let err = AnyGenerator::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown generator backend"));
    }

    #[test]
    fn http_backend_requires_endpoint() {
        let config = BatchConfig::default();
        assert!(AnyGenerator::from_config(&config).is_err());

        let config = BatchConfig {
            endpoint: "http://localhost/generate".into(),
            ..Default::default()
        };
        assert!(matches!(
            AnyGenerator::from_config(&config),
            Ok(AnyGenerator::Http(_))
        ));
    }

    #[test]
    fn generator_debug_names_backend() {
        let config = BatchConfig {
            endpoint: "http://localhost/generate".into(),
            ..Default::default()
        };
        let generator = AnyGenerator::from_config(&config).unwrap();
        assert!(format!("{generator:?}").starts_with("Http"));
    }

    #[test]
    fn artifact_name_prefers_url_basename() {
        assert_eq!(
            artifact_file_name(
                "https://cdn.example/abc/sunset_wave.mp4?sig=1",
                Path::new("sunset.jpg"),
                "Ocean Wave"
            ),
            "sunset_wave.mp4"
        );
        assert_eq!(
            artifact_file_name("https://cdn.example/abc/", Path::new("sunset.jpg"), "Ocean Wave"),
            "sunset_ocean_wave_generated.bin"
        );
    }

    #[tokio::test]
    async fn http_generator_downloads_artifact() {
        let server = MockServer::start().await;
        let artifact_url = format!("{}/artifacts/sunset_wave.mp4", server.uri());

        Mock::given(method("POST"))
            .and(path("/generate"))
            .and(query_param("effect", "Ocean Wave"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "generation_id": "gen-123",
                "urls": [artifact_url]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/artifacts/sunset_wave.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path()).await;
        let out = dir.path().join("generated");
        tokio::fs::create_dir(&out).await.unwrap();

        let generator = HttpGenerator::new("key".into(), format!("{}/generate", server.uri()));
        let artifact = generator
            .generate(&input, "Ocean Wave", &params(), &out)
            .await
            .unwrap();

        assert_eq!(artifact.generation_id.as_deref(), Some("gen-123"));
        assert_eq!(artifact.paths, vec![out.join("sunset_wave.mp4")]);
        assert_eq!(
            tokio::fs::read(&artifact.paths[0]).await.unwrap(),
            b"mp4bytes"
        );
    }

    #[tokio::test]
    async fn http_generator_falls_back_to_alternate_url() {
        let server = MockServer::start().await;
        let dead_url = format!("{}/artifacts/dead.mp4", server.uri());
        let live_url = format!("{}/artifacts/live.mp4", server.uri());

        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "urls": [dead_url, live_url]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/artifacts/dead.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/artifacts/live.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path()).await;
        let out = dir.path().join("generated");
        tokio::fs::create_dir(&out).await.unwrap();

        let generator = HttpGenerator::new("key".into(), format!("{}/generate", server.uri()));
        let artifact = generator
            .generate(&input, "wave", &params(), &out)
            .await
            .unwrap();
        assert_eq!(artifact.paths, vec![out.join("live.mp4")]);
    }

    #[tokio::test]
    async fn claimed_success_without_fetchable_artifact_fails() {
        let server = MockServer::start().await;
        let dead_url = format!("{}/artifacts/gone.mp4", server.uri());

        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "urls": [dead_url]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/artifacts/gone.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path()).await;
        let out = dir.path().join("generated");
        tokio::fs::create_dir(&out).await.unwrap();

        let generator = HttpGenerator::new("key".into(), format!("{}/generate", server.uri()));
        let err = generator
            .generate(&input, "wave", &params(), &out)
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::ArtifactUnavailable(_)));
    }

    #[tokio::test]
    async fn in_band_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "error": "content policy"
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path()).await;

        let generator = HttpGenerator::new("key".into(), format!("{}/generate", server.uri()));
        let err = generator
            .generate(&input, "wave", &params(), dir.path())
            .await
            .unwrap_err();
        match err {
            GeneratorError::InBand(msg) => assert_eq!(msg, "content policy"),
            other => panic!("expected InBand, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_maps_to_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path()).await;

        let generator = HttpGenerator::new("key".into(), format!("{}/generate", server.uri()));
        let err = generator
            .generate(&input, "wave", &params(), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GeneratorError::RateLimited {
                retry_after_ms: 7000
            }
        ));
    }
}
