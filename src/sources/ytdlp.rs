use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{Extraction, FormatSelector, SourceProvider, StreamCandidate};
use crate::error::ProviderError;

static HTTP_STATUS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"HTTP Error (\d{3})").ok());

/// Proveedor basado en el binario `yt-dlp`.
pub struct YtDlpProvider {
    binary: String,
    // Limitar procesos concurrentes para evitar rate limiting
    rate_limiter: Semaphore,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    formats: Option<Vec<YtDlpFormat>>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: Option<String>,
    url: Option<String>,
    ext: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
    abr: Option<f64>,
    tbr: Option<f64>,
    asr: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YtDlpSearch {
    #[serde(default)]
    entries: Vec<YtDlpInfo>,
}

impl YtDlpProvider {
    pub fn new(binary: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            binary: binary.into(),
            rate_limiter: Semaphore::new(max_concurrent.max(1)),
        }
    }

    /// Verifica que el binario esté instalado y responda.
    pub async fn check_available(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("No se pudo ejecutar {}", self.binary))?;

        if !output.status.success() {
            anyhow::bail!("{} --version terminó con {}", self.binary, output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run(&self, args: &[&str]) -> Result<String, ProviderError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ProviderError::Other(e.to_string()))?;

        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProviderError::Other(format!("Error al ejecutar yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp falló: {}", stderr.trim());
            return Err(classify_stderr(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl SourceProvider for YtDlpProvider {
    async fn search(&self, text: &str) -> Result<String, ProviderError> {
        info!("🔍 Buscando en YouTube: {}", text);
        let query = format!("ytsearch1:{text}");
        let stdout = self
            .run(&[
                "--flat-playlist",
                "--dump-single-json",
                "--no-warnings",
                &query,
            ])
            .await?;
        parse_search(&stdout)
    }

    async fn extract(
        &self,
        reference: &str,
        selector: FormatSelector,
    ) -> Result<Extraction, ProviderError> {
        debug!("📊 Obteniendo info de: {}", reference);
        let format = match selector {
            FormatSelector::Best => "bestaudio/best",
            FormatSelector::Relaxed => "worstaudio/worst",
        };
        let stdout = self
            .run(&[
                "--no-playlist",
                "--dump-single-json",
                "--no-warnings",
                "-f",
                format,
                reference,
            ])
            .await?;
        parse_extraction(&stdout)
    }
}

fn parse_search(stdout: &str) -> Result<String, ProviderError> {
    let search: YtDlpSearch = serde_json::from_str(stdout)
        .map_err(|e| ProviderError::Other(format!("Error al parsear respuesta de yt-dlp: {e}")))?;

    search
        .entries
        .into_iter()
        .find_map(|entry| {
            entry
                .webpage_url
                .or(entry.url)
                .or_else(|| entry.id.map(|id| format!("https://www.youtube.com/watch?v={id}")))
        })
        .ok_or_else(|| ProviderError::NotFound("la búsqueda no devolvió resultados".into()))
}

fn parse_extraction(stdout: &str) -> Result<Extraction, ProviderError> {
    let info: YtDlpInfo = serde_json::from_str(stdout)
        .map_err(|e| ProviderError::Other(format!("Error al parsear respuesta de yt-dlp: {e}")))?;

    let candidates = info
        .formats
        .unwrap_or_default()
        .into_iter()
        .filter_map(|format| {
            let url = format.url?;
            let has_audio = format.acodec.as_deref() != Some("none");
            if !has_audio {
                return None;
            }
            Some(StreamCandidate {
                url,
                format_id: format.format_id,
                container: format.ext,
                bitrate_kbps: format.abr.or(format.tbr),
                sample_rate: format.asr.map(|r| r as u32),
                filesize: format.filesize.or(format.filesize_approx).map(|s| s as u64),
                audio_only: format.vcodec.as_deref() == Some("none"),
            })
        })
        .collect();

    Ok(Extraction {
        candidates,
        direct_url: info.url,
        title: info.title,
        duration_secs: info.duration.map(|d| d.round() as u64),
        thumbnail: info.thumbnail,
        webpage_url: info.webpage_url,
        uploader: info.uploader,
    })
}

/// Traduce el stderr de yt-dlp a un error clasificado.
fn classify_stderr(stderr: &str) -> ProviderError {
    let detail = stderr
        .lines()
        .rev()
        .find(|line| line.contains("ERROR"))
        .unwrap_or(stderr)
        .trim()
        .to_string();

    let status = HTTP_STATUS
        .as_ref()
        .and_then(|re| re.captures(stderr))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok());

    match status {
        Some(429) => return ProviderError::RateLimited(detail),
        Some(404) | Some(410) => return ProviderError::NotFound(detail),
        Some(code) if code >= 500 => return ProviderError::Transient(detail),
        _ => {}
    }

    let lower = stderr.to_lowercase();
    if lower.contains("requested format is not available") || lower.contains("unsupported url") {
        ProviderError::Unsupported(detail)
    } else if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("has been removed")
    {
        ProviderError::NotFound(detail)
    } else if lower.contains("timed out") || lower.contains("connection reset") {
        ProviderError::Transient(detail)
    } else {
        ProviderError::Other(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_search_prefers_webpage_url() {
        let stdout = r#"{"_type":"playlist","entries":[
            {"id":"FGBhQbmPwH8","title":"One More Time","url":"https://www.youtube.com/watch?v=FGBhQbmPwH8"}
        ]}"#;
        assert_eq!(
            parse_search(stdout).unwrap(),
            "https://www.youtube.com/watch?v=FGBhQbmPwH8"
        );

        let id_only = r#"{"entries":[{"id":"abc123"}]}"#;
        assert_eq!(
            parse_search(id_only).unwrap(),
            "https://www.youtube.com/watch?v=abc123"
        );

        assert!(matches!(
            parse_search(r#"{"entries":[]}"#),
            Err(ProviderError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_extraction_keeps_audio_formats() {
        let stdout = r#"{
            "id": "FGBhQbmPwH8",
            "title": "Daft Punk - One More Time",
            "duration": 320.4,
            "uploader": "Daft Punk",
            "webpage_url": "https://www.youtube.com/watch?v=FGBhQbmPwH8",
            "url": "https://rr1.example/140",
            "formats": [
                {"format_id":"140","url":"https://rr1.example/140","ext":"m4a","acodec":"mp4a.40.2","vcodec":"none","abr":129.5,"asr":44100,"filesize":5200000},
                {"format_id":"251","url":"https://rr1.example/251","ext":"webm","acodec":"opus","vcodec":"none","abr":160.0,"asr":48000,"filesize_approx":6100000.0},
                {"format_id":"137","url":"https://rr1.example/137","ext":"mp4","acodec":"none","vcodec":"avc1"},
                {"format_id":"18","url":"https://rr1.example/18","ext":"mp4","acodec":"mp4a.40.2","vcodec":"avc1","tbr":500.0}
            ]
        }"#;

        let extraction = parse_extraction(stdout).unwrap();
        assert_eq!(extraction.title.as_deref(), Some("Daft Punk - One More Time"));
        assert_eq!(extraction.duration_secs, Some(320));
        assert_eq!(extraction.direct_url.as_deref(), Some("https://rr1.example/140"));
        assert_eq!(extraction.candidates.len(), 3);

        let opus = &extraction.candidates[1];
        assert_eq!(opus.container.as_deref(), Some("webm"));
        assert_eq!(opus.filesize, Some(6_100_000));
        assert_eq!(opus.sample_rate, Some(48000));
        assert!(opus.audio_only);
        assert!(!extraction.candidates[2].audio_only);
    }

    #[test]
    fn test_classify_stderr() {
        assert!(matches!(
            classify_stderr("ERROR: unable to download webpage: HTTP Error 429: Too Many Requests"),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            classify_stderr("ERROR: [youtube] abc: Video unavailable"),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            classify_stderr("ERROR: HTTP Error 404: Not Found"),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            classify_stderr("ERROR: [youtube] abc: Requested format is not available"),
            ProviderError::Unsupported(_)
        ));
        assert!(classify_stderr("ERROR: HTTP Error 503: Service Unavailable").is_transient());
        assert!(classify_stderr("ERROR: The read operation timed out").is_transient());
        assert!(matches!(classify_stderr("boom"), ProviderError::Other(_)));
    }
}
