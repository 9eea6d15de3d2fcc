//! Static HTTP text served from program memory.
//!
//! Responses carry no headers and no Content-Length; the channel is closed
//! after the body to delimit it.

/// Status line plus the blank line ending the (empty) header block
pub static STATUS_200: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// Body returned when a command succeeded
pub static SUCCESS_BODY: &[u8] = b"SUCCESS";

/// Body returned when a command failed
pub static FAILURE_BODY: &[u8] = b"FAIL";

/// Placeholder page
pub static BLANK_PAGE: &[u8] = b"<!DOCTYPE html><html>  success</html>";

/// Control page with the aim and fire buttons
pub static INDEX_PAGE: &[u8] = b"<!DOCTYPE html>\
<html><head><title>Rubber Band Cannon</title>\
<script>function go(a){fetch('/'+a,{method:'POST'});}</script></head>\
<body><h1>Command Buttons</h1>\
<button onclick=\"go('tilt_up')\">Up</button>\
<button onclick=\"go('pan_left')\">Left</button>\
<button onclick=\"go('pan_right')\">Right</button>\
<button onclick=\"go('tilt_down')\">Down</button>\
<button onclick=\"go('fire')\">Fire</button>\
</body></html>";

/// Settings page; the status values are fetched from `/status`
pub static CONFIG_PAGE: &[u8] = b"<!DOCTYPE html>\
<html><head><title>Cannon Settings</title></head><body>\
<h1>Network</h1><pre id=\"s\"></pre>\
<form method=\"POST\" action=\"/ssid__\">\
<input name=\"ssid__\"><input name=\"passwd\" type=\"password\">\
<input type=\"submit\" value=\"Join\"></form>\
<script>fetch('/status').then(r=>r.text()).then(t=>{document.getElementById('s').textContent=t;});</script>\
</body></html>";

/// Opening of the prefetched status object
pub static STATUS_HEAD: &[u8] = b"{";

/// Closing of the prefetched status object
pub static STATUS_TAIL: &[u8] = b"}";

/// Written after the payload of every `AT+CIPSEND`
pub static SEND_TERMINATOR: &[u8] = b"\r\n";
