use crate::error::{ConvertError, Result};
use flate2::read::GzDecoder;
use futures_util::StreamExt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Git ref kind to fetch the archive from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefType {
    Tags,
    Heads,
}

impl RefType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tags => "tags",
            Self::Heads => "heads",
        }
    }
}

/// Archive URL for a version under the given ref kind
#[must_use]
pub fn archive_url(base_url: &str, ref_type: RefType, version: &str) -> String {
    format!("{base_url}/{}/{version}.tar.gz", ref_type.as_str())
}

/// Tagged releases are preferred; anything else is treated as a branch
async fn resolve_ref_type(client: &reqwest::Client, base_url: &str, version: &str) -> RefType {
    let url = archive_url(base_url, RefType::Tags, version);
    match client.head(&url).send().await {
        Ok(resp) if resp.status().is_success() => RefType::Tags,
        Ok(resp) => {
            tracing::debug!("No tag archive for {version} ({}), using heads", resp.status());
            RefType::Heads
        }
        Err(e) => {
            tracing::warn!("Failed to check tags, defaulting to heads: {e}");
            RefType::Heads
        }
    }
}

/// Download the scripts archive and unpack it to `dest`
pub async fn install(base_url: &str, version: &str, dest: &Path) -> Result<()> {
    let client = reqwest::Client::new();
    let ref_type = resolve_ref_type(&client, base_url, version).await;
    let url = archive_url(base_url, ref_type, version);

    tracing::info!("Downloading conversion scripts from {url}");

    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&parent)?;

    let archive_path = parent.join(format!("transformers_{version}.tar.gz"));
    let result = async {
        download(&client, &url, &archive_path).await?;
        let archive = archive_path.clone();
        let target = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extract(&archive, &target))
            .await
            .map_err(|e| ConvertError::Toolchain(format!("Extraction task failed: {e}")))?
    }
    .await;

    let _ = fs::remove_file(&archive_path);
    result?;

    tracing::info!("Conversion scripts installed at {}", dest.display());
    Ok(())
}

async fn download(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ConvertError::Toolchain(format!("Failed to download {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(ConvertError::Toolchain(format!(
            "Failed to download {url}: HTTP {}",
            response.status()
        )));
    }

    let mut file = fs::File::create(path)?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| ConvertError::Toolchain(format!("Download interrupted: {e}")))?;
        file.write_all(&chunk)?;
    }
    file.flush()?;
    Ok(())
}

/// Unpack a `.tar.gz` whose single top-level folder becomes `dest`
pub fn extract(archive_path: &Path, dest: &Path) -> Result<()> {
    let staging = dest.with_extension("partial");
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let file = fs::File::open(archive_path)?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(&staging)
        .map_err(|e| ConvertError::Toolchain(format!("Failed to extract archive: {e}")))?;

    let extracted = fs::read_dir(&staging)?
        .filter_map(std::result::Result::ok)
        .find(|entry| entry.path().is_dir())
        .ok_or_else(|| ConvertError::Toolchain("Archive contained no folder".to_string()))?
        .path();

    fs::rename(&extracted, dest)?;
    fs::remove_dir_all(&staging)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn build_archive(path: &Path) {
        let file = fs::File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

        let content = b"print('convert')\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(
                &mut header,
                "transformers.js-3.6.1/scripts/convert.py",
                &content[..],
            )
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_archive_url() {
        assert_eq!(
            archive_url(
                "https://github.com/huggingface/transformers.js/archive/refs",
                RefType::Tags,
                "3.6.1"
            ),
            "https://github.com/huggingface/transformers.js/archive/refs/tags/3.6.1.tar.gz"
        );
        assert_eq!(
            archive_url("https://example.com/refs", RefType::Heads, "main"),
            "https://example.com/refs/heads/main.tar.gz"
        );
    }

    #[test]
    fn test_extract_moves_top_level_folder() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("scripts.tar.gz");
        build_archive(&archive);

        let dest = temp.path().join("transformers.js");
        extract(&archive, &dest).unwrap();

        assert!(dest.join("scripts/convert.py").is_file());
        assert!(!dest.with_extension("partial").exists());
    }

    #[test]
    fn test_extract_rejects_corrupt_archive() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("broken.tar.gz");
        fs::write(&archive, b"not a tarball").unwrap();

        let err = extract(&archive, &temp.path().join("out")).unwrap_err();
        assert!(matches!(err, ConvertError::Toolchain(_)));
    }
}
