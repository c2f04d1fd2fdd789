use url::Url;

/// Extensiones que el transporte puede reproducir sin pasar por un extractor.
pub const AUDIO_EXTENSIONS: [&str; 7] = ["mp3", "m4a", "ogg", "opus", "flac", "wav", "aac"];

/// Verifica si la cadena es una URL http(s) bien formada.
pub fn is_http_url(input: &str) -> bool {
    Url::parse(input)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

/// Verifica si la URL apunta directamente a un archivo de audio.
///
/// Solo se mira la extensión del path; la query (tokens firmados, etc.) se ignora.
pub fn is_audio_url(input: &str) -> bool {
    let Ok(url) = Url::parse(input) else {
        return false;
    };

    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }

    let path = url.path().to_lowercase();
    path.rsplit_once('.')
        .map(|(_, ext)| AUDIO_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_url_detection() {
        assert!(is_audio_url("https://cdn.example.com/music/song.mp3"));
        assert!(is_audio_url("https://cdn.example.com/Song.M4A?token=abc"));
        assert!(is_audio_url("http://radio.example.org/live.ogg"));
        assert!(!is_audio_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(!is_audio_url("https://cdn.example.com/video.mp4"));
        assert!(!is_audio_url("ftp://files.example.com/song.mp3"));
        assert!(!is_audio_url("never gonna give you up"));
    }

    #[test]
    fn test_http_url_detection() {
        assert!(is_http_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(!is_http_url("lofi hip hop"));
        assert!(!is_http_url("file:///tmp/song.mp3"));
    }
}
