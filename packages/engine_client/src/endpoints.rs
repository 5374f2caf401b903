//! Endpoint table for the container and exec resources.

use http::Method;

use crate::request::{EndpointSpec, NotFoundPolicy, TimeoutPolicy};

use NotFoundPolicy::{Generic, NoSuchContainer};
use TimeoutPolicy::{Default as Bounded, Unbounded};

const fn spec(
    name: &'static str,
    method: Method,
    path: &'static str,
    not_found: NotFoundPolicy,
    timeout: TimeoutPolicy,
) -> EndpointSpec {
    EndpointSpec {
        name,
        method,
        path,
        not_found,
        timeout,
    }
}

pub mod containers {
    use super::*;

    pub static LIST: EndpointSpec = spec(
        "containers.list",
        Method::GET,
        "containers/json",
        Generic,
        Bounded,
    );
    pub static INSPECT: EndpointSpec = spec(
        "containers.inspect",
        Method::GET,
        "containers/{}/json",
        NoSuchContainer,
        Bounded,
    );
    pub static CREATE: EndpointSpec = spec(
        "containers.create",
        Method::POST,
        "containers/create",
        NoSuchContainer,
        Bounded,
    );
    pub static EXPORT: EndpointSpec = spec(
        "containers.export",
        Method::GET,
        "containers/{}/export",
        NoSuchContainer,
        Bounded,
    );
    pub static TOP: EndpointSpec = spec(
        "containers.top",
        Method::GET,
        "containers/{}/top",
        NoSuchContainer,
        Bounded,
    );
    pub static CHANGES: EndpointSpec = spec(
        "containers.changes",
        Method::GET,
        "containers/{}/changes",
        NoSuchContainer,
        Bounded,
    );
    pub static START: EndpointSpec = spec(
        "containers.start",
        Method::POST,
        "containers/{}/start",
        NoSuchContainer,
        Bounded,
    );
    pub static STOP: EndpointSpec = spec(
        "containers.stop",
        Method::POST,
        "containers/{}/stop",
        NoSuchContainer,
        Unbounded,
    );
    pub static RESTART: EndpointSpec = spec(
        "containers.restart",
        Method::POST,
        "containers/{}/restart",
        NoSuchContainer,
        Unbounded,
    );
    pub static KILL: EndpointSpec = spec(
        "containers.kill",
        Method::POST,
        "containers/{}/kill",
        NoSuchContainer,
        Bounded,
    );
    pub static PAUSE: EndpointSpec = spec(
        "containers.pause",
        Method::POST,
        "containers/{}/pause",
        NoSuchContainer,
        Bounded,
    );
    pub static UNPAUSE: EndpointSpec = spec(
        "containers.unpause",
        Method::POST,
        "containers/{}/unpause",
        NoSuchContainer,
        Bounded,
    );
    pub static WAIT: EndpointSpec = spec(
        "containers.wait",
        Method::POST,
        "containers/{}/wait",
        NoSuchContainer,
        Unbounded,
    );
    pub static REMOVE: EndpointSpec = spec(
        "containers.remove",
        Method::DELETE,
        "containers/{}",
        NoSuchContainer,
        Bounded,
    );
    pub static LOGS: EndpointSpec = spec(
        "containers.logs",
        Method::GET,
        "containers/{}/logs",
        NoSuchContainer,
        Bounded,
    );
    pub static GET_ARCHIVE: EndpointSpec = spec(
        "containers.archive",
        Method::GET,
        "containers/{}/archive",
        NoSuchContainer,
        Bounded,
    );
    pub static PUT_ARCHIVE: EndpointSpec = spec(
        "containers.extract",
        Method::PUT,
        "containers/{}/archive",
        NoSuchContainer,
        Bounded,
    );
    pub static ATTACH: EndpointSpec = spec(
        "containers.attach",
        Method::POST,
        "containers/{}/attach",
        NoSuchContainer,
        Bounded,
    );
    pub static RESIZE: EndpointSpec = spec(
        "containers.resize",
        Method::POST,
        "containers/{}/resize",
        NoSuchContainer,
        Bounded,
    );
    pub static EXEC_CREATE: EndpointSpec = spec(
        "containers.exec",
        Method::POST,
        "containers/{}/exec",
        NoSuchContainer,
        Bounded,
    );
    pub static STATS: EndpointSpec = spec(
        "containers.stats",
        Method::GET,
        "containers/{}/stats",
        Generic,
        Bounded,
    );
    pub static RENAME: EndpointSpec = spec(
        "containers.rename",
        Method::POST,
        "containers/{}/rename",
        NoSuchContainer,
        Bounded,
    );
}

pub mod exec {
    use super::*;

    pub static START: EndpointSpec = spec(
        "exec.start",
        Method::POST,
        "exec/{}/start",
        NoSuchContainer,
        Bounded,
    );
    pub static INSPECT: EndpointSpec = spec(
        "exec.inspect",
        Method::GET,
        "exec/{}/json",
        NoSuchContainer,
        Bounded,
    );
    pub static RESIZE: EndpointSpec = spec(
        "exec.resize",
        Method::POST,
        "exec/{}/resize",
        NoSuchContainer,
        Bounded,
    );
}
