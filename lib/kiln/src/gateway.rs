//! Coordinator-side of the HTTPS surface. The transport layer parses the
//! request line, headers and form body; this module consumes the parsed
//! values, enforces the path/field table and folds scheduler outcomes into
//! the stable JSON replies.

use crate::scheduler::{HeartbeatReply, Scheduler};
use crate::task::{JobSpec, TaskRow, TaskState};
use hashbrown::HashMap;
use serde_derive::Serialize;

const MISSING_PARAMETER: &str = "Error : Missing Parameter";

/// A parsed request as delivered by the transport layer.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub form: HashMap<String, String>,
    /// Remote address of the connection, `ip` or `ip:port`.
    pub remote_addr: String,
    /// Value of the `X-FORWARDED-FOR` header, if any.
    pub forwarded_for: Option<String>,
}

impl Request {
    pub fn post(path: &str, remote_addr: &str) -> Request {
        Request {
            method: "POST".to_string(),
            path: path.to_string(),
            form: HashMap::new(),
            remote_addr: remote_addr.to_string(),
            forwarded_for: None,
        }
    }

    pub fn field(mut self, name: &str, value: &str) -> Request {
        self.form.insert(name.to_string(), value.to_string());
        self
    }

    pub fn forwarded(mut self, value: &str) -> Request {
        self.forwarded_for = Some(value.to_string());
        self
    }

    /// The caller's bare IP: the forwarded address when present, else the
    /// connection's remote address, truncated at the first `:`.
    pub fn caller_ip(&self) -> String {
        let raw = self.forwarded_for.as_deref().unwrap_or(&self.remote_addr);

        raw.split(':').next().unwrap_or("").to_string()
    }

    #[inline]
    fn value(&self, name: &str) -> &str {
        self.form.get(name).map(|value| value.as_str()).unwrap_or("")
    }

    fn has_all(&self, fields: &[&str]) -> bool {
        fields.iter().all(|&field| self.form.contains_key(field))
    }
}

/// Reply handed back to the transport layer. Bodies of 200 replies are
/// JSON; 404 carries the legacy plain-text body.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    fn json<T: serde::Serialize>(value: &T) -> Response {
        Response {
            status: 200,
            body: serde_json::to_string(value).expect("Reply serialization failed"),
        }
    }

    fn state(token: &str) -> Response {
        Response::json(&StatusBody { state: token })
    }

    fn missing_parameter() -> Response {
        Response::state(MISSING_PARAMETER)
    }

    fn not_found() -> Response {
        Response {
            status: 404,
            body: "404 not found.".to_string(),
        }
    }
}

#[derive(Serialize)]
struct StatusBody<'a> {
    #[serde(rename = "State")]
    state: &'a str,
}

/// Routes one request. Unknown method or path is a 404, like an unknown
/// api key; missing form fields answer 200 with the legacy error body.
pub fn handle(scheduler: &Scheduler, request: &Request) -> Response {
    if request.method != "POST" {
        return Response::not_found();
    }

    match request.path.as_str() {
        "/postJob" => post_job(scheduler, request),
        "/uploadCompleted" => upload_completed(scheduler, request),
        "/getJob" => get_job(scheduler, request),
        "/updateJob" => update_job(scheduler, request),
        "/abortJob" => abort_job(scheduler, request),
        "/postNode" => post_node(scheduler, request),
        "/setAvailable" => set_available(scheduler, request),
        "/errorNode" => error_node(scheduler, request),
        "/getAllRenderTasks" => all_render_tasks(scheduler, request),
        _ => Response::not_found(),
    }
}

fn post_job(scheduler: &Scheduler, request: &Request) -> Response {
    if !request.has_all(&[
        "api_key",
        "project",
        "input",
        "output",
        "frameStart",
        "frameStop",
        "rendererName",
        "rendererVersion",
        "startTime",
    ]) {
        return Response::missing_parameter();
    }

    if !scheduler.key_known(request.value("api_key")) {
        return Response::not_found();
    }

    let frame_start = match request.value("frameStart").parse::<u32>() {
        Ok(frame) => frame,
        Err(_) => return Response::missing_parameter(),
    };
    let frame_stop = match request.value("frameStop").parse::<u32>() {
        Ok(frame) => frame,
        Err(_) => return Response::missing_parameter(),
    };

    if frame_stop < frame_start {
        return Response::missing_parameter();
    }

    let ticket = scheduler.submit_job(JobSpec {
        project: request.value("project").to_string(),
        input: request.value("input").to_string(),
        output: request.value("output").to_string(),
        frame_start,
        frame_stop,
        renderer_name: request.value("rendererName").to_string(),
        renderer_version: request.value("rendererVersion").to_string(),
        start_time: request.value("startTime").to_string(),
    });

    Response::json(&ticket)
}

fn upload_completed(scheduler: &Scheduler, request: &Request) -> Response {
    if !request.has_all(&["api_key", "project", "id", "size", "input"]) {
        return Response::missing_parameter();
    }

    if !scheduler.key_known(request.value("api_key")) {
        return Response::not_found();
    }

    let size = match request.value("size").parse::<u64>() {
        Ok(size) => size,
        Err(_) => return Response::missing_parameter(),
    };

    let outcome = scheduler.upload_completed(request.value("id"), request.value("input"), size);

    Response::state(outcome.as_str())
}

fn get_job(scheduler: &Scheduler, request: &Request) -> Response {
    if !request.has_all(&["api_key", "name"]) {
        return Response::missing_parameter();
    }

    if !scheduler.key_known(request.value("api_key")) {
        return Response::not_found();
    }

    let node = match scheduler.resolve_node(request.value("name"), &request.caller_ip()) {
        Some(node) => node,
        None => return Response::not_found(),
    };

    match scheduler.next_task(&node) {
        Some(row) => Response::json(&row),
        // An empty task tells the worker to idle and retry.
        None => Response::json(&TaskRow::default()),
    }
}

fn update_job(scheduler: &Scheduler, request: &Request) -> Response {
    if !request.has_all(&["api_key", "id", "frame", "state", "percent", "mem", "name"]) {
        return Response::missing_parameter();
    }

    if !scheduler.key_known(request.value("api_key")) {
        return Response::not_found();
    }

    if scheduler
        .resolve_node(request.value("name"), &request.caller_ip())
        .is_none()
    {
        return Response::not_found();
    }

    let frame = match request.value("frame").parse::<u32>() {
        Ok(frame) => frame,
        Err(_) => return Response::missing_parameter(),
    };

    // Workers only ever report progress or completion.
    let reported = match TaskState::parse(request.value("state")) {
        Some(state @ TaskState::Rendering) | Some(state @ TaskState::Rendered) => state,
        _ => return Response::missing_parameter(),
    };

    let reply = scheduler.heartbeat(
        request.value("id"),
        frame,
        reported,
        request.value("percent"),
        request.value("mem"),
    );

    match reply {
        HeartbeatReply::Ok => Response::state("OK"),
        HeartbeatReply::Abort => Response::state("ABORT"),
        HeartbeatReply::NoRender => Response::state("Error : No matching Renders"),
        HeartbeatReply::FrameIs(state) => {
            Response::state(&format!("The frame is like {}", state.as_str()))
        }
    }
}

fn abort_job(scheduler: &Scheduler, request: &Request) -> Response {
    if !request.has_all(&["api_key", "id"]) {
        return Response::missing_parameter();
    }

    if !scheduler.key_known(request.value("api_key")) {
        return Response::not_found();
    }

    if scheduler.abort_job(request.value("id")) {
        Response::state("OK")
    } else {
        Response::state("error: can't find job")
    }
}

fn post_node(scheduler: &Scheduler, request: &Request) -> Response {
    if !request.has_all(&["api_key", "name"]) {
        return Response::missing_parameter();
    }

    if !scheduler.key_known(request.value("api_key")) {
        return Response::not_found();
    }

    let outcome = scheduler.register_node(
        request.value("name"),
        &request.caller_ip(),
        request.value("api_key"),
    );

    Response::state(outcome.as_str())
}

fn set_available(scheduler: &Scheduler, request: &Request) -> Response {
    if !request.has_all(&["api_key", "name"]) {
        return Response::missing_parameter();
    }

    if !scheduler.key_known(request.value("api_key")) {
        return Response::not_found();
    }

    if scheduler.release_node(request.value("name"), &request.caller_ip()) {
        Response::state("OK")
    } else {
        Response::state("Can't find node")
    }
}

fn error_node(scheduler: &Scheduler, request: &Request) -> Response {
    if !request.has_all(&["api_key", "name"]) {
        return Response::missing_parameter();
    }

    if !scheduler.key_known(request.value("api_key")) {
        return Response::not_found();
    }

    if scheduler.fail_node(request.value("name"), &request.caller_ip()) {
        Response::state("Done")
    } else {
        Response::state("Couldn't find matching node")
    }
}

fn all_render_tasks(scheduler: &Scheduler, request: &Request) -> Response {
    if !request.has_all(&["api_key"]) {
        return Response::missing_parameter();
    }

    if !scheduler.key_known(request.value("api_key")) {
        return Response::not_found();
    }

    Response::json(&scheduler.job_progress())
}
