/// Minimal client served at `GET /`: subscribes over WebSocket (falling back to
/// polling `/state`) and draws the current z-level as a character grid.
pub const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>map</title>
<style>
  body { background: #111; color: #ddd; font-family: monospace; margin: 1em; }
  #grid { line-height: 1.1em; white-space: pre; font-size: 16px; }
  .me { background: #ddd; color: #111; }
  .fog { color: #555; }
  #status { color: #888; margin-bottom: .5em; }
</style>
</head>
<body>
<div id="status">connecting</div>
<form id="who"><input id="player" placeholder="player">
<select id="mode"><option>full</option><option>zone</option></select>
<button>watch</button></form>
<div id="grid"></div>
<script>
"use strict";
let ws = null, pollTimer = null;

function esc(s) {
  return s.replace(/[&<>]/g, c => ({ "&": "&amp;", "<": "&lt;", ">": "&gt;" })[c]);
}

function draw(m) {
  const grid = document.getElementById("grid");
  if (!m.player) { grid.textContent = "location unknown"; return; }
  const z = m.player.z;
  const rooms = m.rooms.filter(r => r.z === z);
  const fog = m.frontier.filter(f => f.z === z);
  const xs = rooms.map(r => r.x).concat(fog.map(f => f.x));
  const ys = rooms.map(r => r.y).concat(fog.map(f => f.y));
  const minX = Math.min(...xs), maxX = Math.max(...xs);
  const minY = Math.min(...ys), maxY = Math.max(...ys);
  const colors = Object.fromEntries(m.zones.map(zn => [zn.id, zn.color]));
  const cells = new Map();
  for (const f of fog) cells.set(f.x + "," + f.y, '<span class="fog">?</span>');
  for (const r of rooms) {
    const cls = r.vnum === m.player.vnum ? ' class="me"' : "";
    cells.set(r.x + "," + r.y,
      `<span${cls} style="color:${colors[r.zone]}" title="${esc(r.name)}">${esc(r.symbol)}</span>`);
  }
  let out = "";
  for (let y = minY; y <= maxY; y++) {
    for (let x = minX; x <= maxX; x++) out += cells.get(x + "," + y) || " ";
    out += "\n";
  }
  grid.innerHTML = out;
}

function status(s) { document.getElementById("status").textContent = s; }

function poll(player) {
  clearInterval(pollTimer);
  const tick = () => fetch("/state?player=" + encodeURIComponent(player))
    .then(r => r.ok ? r.json() : Promise.reject(r.status))
    .then(draw)
    .catch(e => status("poll failed: " + e));
  tick();
  pollTimer = setInterval(tick, 2000);
  status("polling");
}

function watch(player, mode) {
  if (ws) ws.close();
  ws = new WebSocket((location.protocol === "https:" ? "wss://" : "ws://") + location.host + "/");
  ws.onopen = () => {
    status("live");
    ws.send(JSON.stringify({ type: "subscribe", player, mode }));
  };
  ws.onmessage = ev => draw(JSON.parse(ev.data));
  ws.onerror = () => poll(player);
  ws.onclose = () => status("disconnected");
}

document.getElementById("who").onsubmit = ev => {
  ev.preventDefault();
  watch(document.getElementById("player").value, document.getElementById("mode").value);
};
</script>
</body>
</html>
"#;
