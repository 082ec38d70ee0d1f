//! Self-contained configuration page served by the portal.

pub const CONFIG_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Device Wi-Fi Setup</title>
<style>
body { font-family: -apple-system, sans-serif; max-width: 420px; margin: 30px auto; padding: 16px; background: #f4f6f8; color: #222; }
h1 { font-size: 1.4em; text-align: center; }
.card { background: #fff; padding: 16px; border-radius: 8px; margin-bottom: 14px; box-shadow: 0 1px 3px rgba(0,0,0,.15); }
label { display: block; margin: 10px 0 4px; }
input { width: 100%; padding: 10px; border: 1px solid #ccc; border-radius: 4px; box-sizing: border-box; }
button { width: 100%; padding: 12px; margin-top: 12px; border: none; border-radius: 4px; color: #fff; background: #1976d2; cursor: pointer; }
button.danger { background: #c62828; }
#networks div { padding: 6px; border-bottom: 1px solid #eee; cursor: pointer; }
#msg { text-align: center; min-height: 1.2em; }
</style>
</head>
<body>
<h1>Device Wi-Fi Setup</h1>
<div class="card">
  <button onclick="scan()">Scan networks</button>
  <div id="networks"></div>
</div>
<div class="card">
  <label for="ssid">Network (SSID)</label>
  <input id="ssid" maxlength="32">
  <label for="password">Password</label>
  <input id="password" type="password" maxlength="64">
  <button onclick="save()">Save &amp; connect</button>
</div>
<div class="card">
  <button class="danger" onclick="reset()">Reset Wi-Fi settings</button>
</div>
<p id="msg"></p>
<script>
function msg(t) { document.getElementById('msg').textContent = t; }
function scan() {
  msg('Scanning...');
  fetch('/scan').then(r => r.json()).then(d => {
    const list = document.getElementById('networks');
    list.innerHTML = '';
    d.networks.forEach(n => {
      const row = document.createElement('div');
      row.textContent = n.ssid + ' (' + n.rssi + ' dBm, ' + n.encryption + ')';
      row.onclick = () => { document.getElementById('ssid').value = n.ssid; };
      list.appendChild(row);
    });
    msg(d.networks.length + ' networks found');
  }).catch(() => msg('Scan failed'));
}
function save() {
  const body = new URLSearchParams();
  body.append('ssid', document.getElementById('ssid').value);
  body.append('password', document.getElementById('password').value);
  fetch('/config', { method: 'POST', body: body })
    .then(r => r.json()).then(d => msg(d.message)).catch(() => msg('Save failed'));
}
function reset() {
  if (!confirm('Erase stored Wi-Fi settings?')) return;
  fetch('/reset', { method: 'POST' })
    .then(r => r.json()).then(d => msg(d.message)).catch(() => msg('Reset failed'));
}
</script>
</body>
</html>
"#;
