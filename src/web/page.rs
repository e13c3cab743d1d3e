/// Single-page front end. The button stays disabled while a request runs.
pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Convert a Hugging Face model to ONNX</title>
<style>
  body { font-family: system-ui, sans-serif; max-width: 44rem; margin: 3rem auto; padding: 0 1rem; }
  label { display: block; margin: 1rem 0 .25rem; }
  input[type=text], input[type=password] { width: 100%; padding: .5rem; box-sizing: border-box; }
  button { margin-top: 1.25rem; padding: .6rem 1.4rem; }
  .hidden { display: none; }
  .error { color: #b00020; }
  .success { color: #1b5e20; }
  .warning { color: #8a6d00; }
  pre { background: #f4f4f4; padding: .75rem; overflow-x: auto; max-height: 20rem; }
</style>
</head>
<body>
<h2>Convert a Hugging Face model to ONNX</h2>

<label for="model_id">Enter the Hugging Face model ID to convert. Example: <code>EleutherAI/pythia-14m</code></label>
<input id="model_id" type="text" autocomplete="off" placeholder="namespace/name">

<label for="user_token">Optional: your Hugging Face write token. Fill it to upload under your account.</label>
<input id="user_token" type="password" autocomplete="off">

<label><input id="quantize" type="checkbox"> Quantize the exported model</label>
<label><input id="trust_remote_code" type="checkbox"> Optional: Trust Remote Code</label>
<p id="trust_warning" class="warning hidden">Only enable this for repositories you trust and whose code you have read: it executes arbitrary code from the model repository. It requires your own write token.</p>
<label id="same_repo_row" class="hidden"><input id="same_repo" type="checkbox"> Upload the ONNX weights to the same repository</label>

<div id="preview"></div>
<button id="proceed" disabled>Proceed</button>
<div id="status"></div>

<script>
const $ = (id) => document.getElementById(id);
let inFlight = false;
let previewTimer = null;

function form() {
  return {
    model_id: $("model_id").value.trim(),
    user_token: $("user_token").value.trim() || null,
    quantize: $("quantize").checked,
    trust_remote_code: $("trust_remote_code").checked,
    same_repo: $("same_repo").checked,
  };
}

function setStatus(html, cls) {
  $("status").className = cls || "";
  $("status").innerHTML = html;
}

function escapeHtml(text) {
  const div = document.createElement("div");
  div.textContent = text;
  return div.innerHTML;
}

async function refreshPreview() {
  const body = form();
  $("preview").innerHTML = "";
  $("proceed").disabled = true;
  if (!body.model_id) return;

  const resp = await fetch("/api/preview", {
    method: "POST",
    headers: { "Content-Type": "application/json" },
    body: JSON.stringify({ model_id: body.model_id, same_repo: body.same_repo, user_token: body.user_token }),
  });
  const data = await resp.json();
  if (!resp.ok) {
    $("preview").innerHTML = `<p class="error">${escapeHtml(data.error)}</p>`;
    return;
  }

  $("same_repo_row").classList.toggle("hidden", !data.can_use_same_repo);
  const link = `<a href="${data.destination_url}" target="_blank">${escapeHtml(data.destination_name)}</a>`;
  if (data.already_converted) {
    $("preview").innerHTML = `<p>This model has already been converted! 🎉 Go to ${link}</p>`;
    return;
  }
  $("preview").innerHTML = `<p>URL where the model will be converted and uploaded to:</p><pre>${escapeHtml(data.destination_url)}</pre>`;
  $("proceed").disabled = inFlight;
}

function schedulePreview() {
  clearTimeout(previewTimer);
  previewTimer = setTimeout(refreshPreview, 400);
}

async function proceed() {
  if (inFlight) return;
  inFlight = true;
  $("proceed").disabled = true;
  setStatus("<p>Converting model… this can take several minutes.</p>");

  try {
    const resp = await fetch("/api/convert", {
      method: "POST",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify(form()),
    });
    const data = await resp.json();
    if (!resp.ok) {
      setStatus(`<p>${escapeHtml(data.error)}</p>`, "error");
    } else if (data.success) {
      const output = data.exporter_output ? `<pre>${escapeHtml(data.exporter_output)}</pre>` : "";
      setStatus(`<p>Upload successful! You can now view the model on Hugging Face: <a href="${data.destination_url}" target="_blank">${escapeHtml(data.destination_name)}</a></p>${output}`, "success");
    } else {
      setStatus(`<p>${escapeHtml(data.error_message)}</p>`, "error");
    }
  } catch (err) {
    setStatus(`<p>Request failed: ${escapeHtml(String(err))}</p>`, "error");
  } finally {
    inFlight = false;
    refreshPreview();
  }
}

$("model_id").addEventListener("input", schedulePreview);
$("user_token").addEventListener("change", schedulePreview);
$("same_repo").addEventListener("change", schedulePreview);
$("trust_remote_code").addEventListener("change", () =>
  $("trust_warning").classList.toggle("hidden", !$("trust_remote_code").checked));
$("proceed").addEventListener("click", proceed);
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proceed_is_only_enabled_by_preview() {
        assert!(!INDEX_HTML.contains(r#"$("proceed").disabled = false"#));
        assert!(INDEX_HTML.contains(r#"$("proceed").disabled = inFlight"#));

        let finally = INDEX_HTML.split("} finally {").nth(1).unwrap();
        let block = &finally[..finally.find('}').unwrap()];
        assert!(block.contains("refreshPreview()"));
    }
}
