use crate::error::{ConvertError, Result};
use crate::pipeline::{ExportOptions, ExportedModel, Exporter, FetchedModel};
use crate::toolchain::{ScriptOutput, Toolchain};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

const CONVERT_MODULE: &str = "scripts.convert";
const QUANTIZE_MODULE: &str = "scripts.quantize";

/// Markers the exporter prints for architectures it cannot lower
const UNSUPPORTED_MARKERS: &[&str] = &[
    "Unsupported model type",
    "is not supported",
    "not supported yet",
    "Unrecognized configuration class",
];

const MAX_ERROR_CHARS: usize = 600;

/// Exporter that shells out to the transformers.js scripts
#[derive(Debug, Clone)]
pub struct ScriptExporter {
    toolchain: Toolchain,
    output_root: PathBuf,
    hub_cache: PathBuf,
    endpoint: String,
}

impl ScriptExporter {
    /// `endpoint` is the hub the scripts resolve models against
    #[must_use]
    pub const fn new(
        toolchain: Toolchain,
        output_root: PathBuf,
        hub_cache: PathBuf,
        endpoint: String,
    ) -> Self {
        Self {
            toolchain,
            output_root,
            hub_cache,
            endpoint,
        }
    }

    async fn run(
        &self,
        module: &'static str,
        args: Vec<OsString>,
        env: Vec<(&'static str, OsString)>,
    ) -> Result<ScriptOutput> {
        self.toolchain.ensure_installed().await?;
        let toolchain = self.toolchain.clone();
        let output = tokio::task::spawn_blocking(move || toolchain.run_module(module, &args, &env))
            .await
            .map_err(|e| ConvertError::Other(format!("{module} task failed: {e}")))??;

        if !output.stdout.trim().is_empty() {
            tracing::debug!("{module} stdout:\n{}", output.stdout.trim_end());
        }
        Ok(output)
    }
}

#[async_trait]
impl Exporter for ScriptExporter {
    async fn export(&self, model: &FetchedModel, options: &ExportOptions) -> Result<ExportedModel> {
        fs::create_dir_all(&self.output_root)?;
        let output_root = fs::canonicalize(&self.output_root)?;
        fs::create_dir_all(&self.hub_cache)?;
        let hub_cache = fs::canonicalize(&self.hub_cache)?;

        tracing::debug!(
            "Exporting {}@{} from {} ({} files, {} bytes)",
            model.model_id,
            model.revision,
            model.snapshot_dir.display(),
            model.files.len(),
            model.total_bytes
        );

        let output_dir = output_root
            .join(model.model_id.namespace())
            .join(model.model_id.name());
        if output_dir.exists() {
            tracing::debug!("Clearing stale output {}", output_dir.display());
            fs::remove_dir_all(&output_dir)?;
        }

        let mut args: Vec<OsString> = vec![
            "--model_id".into(),
            model.model_id.to_string().into(),
            "--output_parent_dir".into(),
            output_root.into_os_string(),
        ];
        if options.trust_remote_code {
            args.push("--trust_remote_code".into());
        }

        let mut env = vec![
            ("HF_HUB_CACHE", hub_cache.into_os_string()),
            ("HF_ENDPOINT", OsString::from(&self.endpoint)),
        ];
        if let Some(cred) = &options.credential {
            env.push(("HF_TOKEN", cred.expose().into()));
        }

        let output = self.run(CONVERT_MODULE, args, env).await?;
        if !output.success {
            return Err(ConvertError::Export(summarize_failure(&output.stderr)));
        }

        let onnx_files = list_onnx_files(&output_dir)?;
        if onnx_files.is_empty() {
            return Err(ConvertError::Export(format!(
                "The exporter produced no ONNX files for {}",
                model.model_id
            )));
        }
        let artifact_bytes = total_size(&onnx_files);

        tracing::info!(
            "Exported {} graph(s) for {} ({} bytes)",
            onnx_files.len(),
            model.model_id,
            artifact_bytes
        );

        Ok(ExportedModel {
            model_id: model.model_id.clone(),
            output_dir,
            onnx_files,
            artifact_bytes,
            log: output.stderr,
        })
    }

    async fn quantize(&self, exported: &ExportedModel) -> Result<ExportedModel> {
        let onnx_dir = exported.output_dir.join("onnx");
        if !onnx_dir.is_dir() {
            return Err(ConvertError::Quantization(format!(
                "No onnx/ folder in {}",
                exported.output_dir.display()
            )));
        }

        let before: BTreeSet<PathBuf> = list_onnx_files(&onnx_dir)?.into_iter().collect();

        let mut args: Vec<OsString> = vec![
            "--input_folder".into(),
            onnx_dir.clone().into_os_string(),
            "--output_folder".into(),
            onnx_dir.clone().into_os_string(),
            "--modes".into(),
        ];
        args.extend(self.toolchain.quantize_modes().iter().map(OsString::from));

        let output = self.run(QUANTIZE_MODULE, args, Vec::new()).await?;
        if !output.success {
            return Err(ConvertError::Quantization(summarize_failure(&output.stderr)));
        }

        let quantized: Vec<PathBuf> = list_onnx_files(&onnx_dir)?
            .into_iter()
            .filter(|p| !before.contains(p))
            .collect();
        if quantized.is_empty() {
            return Err(ConvertError::Quantization(
                "The quantizer produced no new graphs".to_string(),
            ));
        }
        let artifact_bytes = total_size(&quantized);

        tracing::info!(
            "Quantized {} graph(s): {} -> {} bytes",
            quantized.len(),
            exported.artifact_bytes,
            artifact_bytes
        );

        let mut log = exported.log.clone();
        if !output.stderr.trim().is_empty() {
            log.push('\n');
            log.push_str(&output.stderr);
        }

        Ok(ExportedModel {
            model_id: exported.model_id.clone(),
            output_dir: exported.output_dir.clone(),
            onnx_files: quantized,
            artifact_bytes,
            log,
        })
    }
}

/// Condense exporter stderr into one short line
#[must_use]
pub fn summarize_failure(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if let Some(line) = lines
        .iter()
        .rev()
        .find(|l| UNSUPPORTED_MARKERS.iter().any(|m| l.contains(m)))
    {
        return crate::hub::truncate(
            &format!("Unsupported model architecture: {line}"),
            MAX_ERROR_CHARS,
        );
    }

    match lines.last() {
        Some(line) => crate::hub::truncate(line, MAX_ERROR_CHARS),
        None => "The exporter exited with an error and no output".to_string(),
    }
}

/// All `.onnx` files under `dir`, sorted
pub fn list_onnx_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "onnx") {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Summed size of the graphs plus their external-data sidecars
fn total_size(files: &[PathBuf]) -> u64 {
    files
        .iter()
        .map(|path| {
            let graph = fs::metadata(path).map_or(0, |m| m.len());
            let mut sidecar = path.clone().into_os_string();
            sidecar.push("_data");
            graph + fs::metadata(PathBuf::from(sidecar)).map_or(0, |m| m.len())
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ToolchainConfig;
    use crate::pipeline::ModelId;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::OnceLock;
    use tempfile::TempDir;

    const CONVERT_OK: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --model_id) id="$2"; shift 2 ;;
    --output_parent_dir) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$out/$id/onnx"
printf '%s' "$HF_ENDPOINT" > "$out/$id/endpoint.txt"
printf 'graph' > "$out/$id/onnx/model.onnx"
"#;

    const QUANTIZE_OK: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --output_folder) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf 'q' > "$out/model_quantized.onnx"
"#;

    const PYTHON_STUB: &str = r#"#!/bin/sh
shift
module="$1"
shift
exec /bin/sh "./$module" "$@"
"#;

    /// Interpreter stand-in: `python -m <module> args..` runs the shell
    /// file named `<module>` from the working directory.
    ///
    /// Written once per test binary so no test executes a file another
    /// thread may still hold open for writing.
    fn python_stub() -> &'static Path {
        static STUB: OnceLock<TempDir> = OnceLock::new();
        STUB.get_or_init(|| {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("python");
            fs::write(&path, PYTHON_STUB).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            dir
        })
        .path()
    }

    fn shell_exporter(temp: &TempDir, convert: &str, quantize: &str) -> ScriptExporter {
        let repo = temp.path().join("transformers.js");
        fs::create_dir_all(repo.join("scripts")).unwrap();
        fs::write(repo.join(CONVERT_MODULE), convert).unwrap();
        fs::write(repo.join(QUANTIZE_MODULE), quantize).unwrap();

        let toolchain = Toolchain::from_config(&ToolchainConfig {
            repo_path: repo,
            python: Some(python_stub().join("python")),
            ..ToolchainConfig::default()
        })
        .unwrap();

        ScriptExporter::new(
            toolchain,
            temp.path().join("output"),
            temp.path().join("hub"),
            "https://hub.example".to_string(),
        )
    }

    fn fetched(temp: &TempDir) -> FetchedModel {
        FetchedModel {
            model_id: ModelId::parse("alice/tiny-bert").unwrap(),
            revision: "main".to_string(),
            snapshot_dir: temp.path().join("hub/snapshot"),
            files: vec!["config.json".to_string()],
            total_bytes: 2,
        }
    }

    #[tokio::test]
    async fn test_export_replaces_stale_output() {
        let temp = TempDir::new().unwrap();
        let exporter = shell_exporter(&temp, CONVERT_OK, QUANTIZE_OK);
        let stale = temp.path().join("output/alice/tiny-bert/onnx/old.onnx");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"old").unwrap();

        let exported = exporter
            .export(&fetched(&temp), &ExportOptions::default())
            .await
            .unwrap();

        assert!(!stale.exists());
        assert_eq!(exported.onnx_files, vec![exported.output_dir.join("onnx/model.onnx")]);
        assert_eq!(exported.artifact_bytes, 5);
        assert_eq!(
            fs::read_to_string(exported.output_dir.join("endpoint.txt")).unwrap(),
            "https://hub.example"
        );
    }

    #[tokio::test]
    async fn test_export_without_graphs_fails() {
        let temp = TempDir::new().unwrap();
        let exporter = shell_exporter(&temp, "exit 0\n", QUANTIZE_OK);

        let err = exporter
            .export(&fetched(&temp), &ExportOptions::default())
            .await
            .unwrap_err();
        match err {
            ConvertError::Export(msg) => assert!(msg.contains("no ONNX files"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_export_nonzero_exit_is_classified() {
        let temp = TempDir::new().unwrap();
        let convert = "echo 'ValueError: Unsupported model type: mamba' >&2\nexit 1\n";
        let exporter = shell_exporter(&temp, convert, QUANTIZE_OK);

        let err = exporter
            .export(&fetched(&temp), &ExportOptions::default())
            .await
            .unwrap_err();
        match err {
            ConvertError::Export(msg) => {
                assert!(msg.starts_with("Unsupported model architecture"), "{msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_quantize_reports_new_graphs_only() {
        let temp = TempDir::new().unwrap();
        let exporter = shell_exporter(&temp, CONVERT_OK, QUANTIZE_OK);
        let exported = exporter
            .export(&fetched(&temp), &ExportOptions::default())
            .await
            .unwrap();

        let quantized = exporter.quantize(&exported).await.unwrap();

        assert_eq!(
            quantized.onnx_files,
            vec![exported.output_dir.join("onnx/model_quantized.onnx")]
        );
        assert_eq!(quantized.artifact_bytes, 1);
        assert!(quantized.artifact_bytes <= exported.artifact_bytes);
    }

    #[tokio::test]
    async fn test_quantize_without_new_graphs_fails() {
        let temp = TempDir::new().unwrap();
        let exporter = shell_exporter(&temp, CONVERT_OK, "exit 0\n");
        let exported = exporter
            .export(&fetched(&temp), &ExportOptions::default())
            .await
            .unwrap();

        let err = exporter.quantize(&exported).await.unwrap_err();
        assert!(matches!(err, ConvertError::Quantization(_)));
    }

    #[tokio::test]
    async fn test_quantize_nonzero_exit_fails() {
        let temp = TempDir::new().unwrap();
        let exporter = shell_exporter(&temp, CONVERT_OK, "echo 'onnxruntime crashed' >&2\nexit 2\n");
        let exported = exporter
            .export(&fetched(&temp), &ExportOptions::default())
            .await
            .unwrap();

        match exporter.quantize(&exported).await.unwrap_err() {
            ConvertError::Quantization(msg) => assert_eq!(msg, "onnxruntime crashed"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_summarize_unsupported_architecture() {
        let stderr = "Traceback (most recent call last):\n  File \"convert.py\", line 1\n\
                      ValueError: Unsupported model type: mamba\n";
        assert_eq!(
            summarize_failure(stderr),
            "Unsupported model architecture: ValueError: Unsupported model type: mamba"
        );
    }

    #[test]
    fn test_summarize_uses_last_line() {
        let stderr = "loading...\nRuntimeError: out of memory\n\n";
        assert_eq!(summarize_failure(stderr), "RuntimeError: out of memory");
        assert_eq!(
            summarize_failure("  \n"),
            "The exporter exited with an error and no output"
        );
    }

    #[test]
    fn test_list_onnx_files_and_size() {
        let temp = TempDir::new().unwrap();
        let onnx = temp.path().join("onnx");
        fs::create_dir_all(&onnx).unwrap();
        fs::write(onnx.join("model.onnx"), vec![0u8; 10]).unwrap();
        fs::write(onnx.join("model.onnx_data"), vec![0u8; 90]).unwrap();
        fs::write(onnx.join("model_quantized.onnx"), vec![0u8; 25]).unwrap();
        fs::write(temp.path().join("config.json"), b"{}").unwrap();

        let files = list_onnx_files(temp.path()).unwrap();
        assert_eq!(files, vec![onnx.join("model.onnx"), onnx.join("model_quantized.onnx")]);
        assert_eq!(total_size(&files[..1]), 100);
        assert_eq!(total_size(&files), 125);
    }

    #[test]
    fn test_list_onnx_files_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert!(list_onnx_files(&temp.path().join("nope")).unwrap().is_empty());
    }
}
