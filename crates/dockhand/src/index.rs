//! Package index checks over the JSON API (`/pypi/<name>/json`).

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;

use crate::ports::RegistryCheckPort;
use crate::types::{CheckResult, Severity};

pub const CHECK_CONNECTIVITY: &str = "index-connectivity";
pub const CHECK_PACKAGE_EXISTS: &str = "index-package-exists";
pub const CHECK_VERSION_EXISTS: &str = "index-version-exists";
pub const CHECK_TLS: &str = "index-tls";

#[derive(Debug, Clone)]
pub struct IndexClient {
    api_base: String,
    http: Client,
}

impl IndexClient {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(format!("dockhand/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn status(&self, url: &str) -> Result<StatusCode> {
        let resp = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("request to {url} failed"))?;
        Ok(resp.status())
    }

    /// `Ok(true)` on 200, `Ok(false)` on 404.
    pub fn exists(&self, url: &str) -> Result<bool> {
        match self.status(url)? {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => anyhow::bail!("unexpected status {s} from {url}"),
        }
    }

    fn existence_check(&self, id: &str, name: &str, what: &str, url: &str) -> CheckResult {
        match self.exists(url) {
            Ok(true) => CheckResult::pass(id, name, Severity::Warning, format!("{what} found on {}", self.api_base)),
            Ok(false) => CheckResult::fail(
                id,
                name,
                Severity::Warning,
                format!("{what} not found on {}", self.api_base),
            ),
            Err(e) => CheckResult::fail(id, name, Severity::Warning, format!("{e:#}"))
                .with_remediation("check network access to the package index"),
        }
    }
}

impl RegistryCheckPort for IndexClient {
    fn check_connectivity(&self) -> CheckResult {
        let name = "Index connectivity";
        match self.status(&format!("{}/", self.api_base)) {
            Ok(s) if s.is_server_error() => CheckResult::fail(
                CHECK_CONNECTIVITY,
                name,
                Severity::Blocking,
                format!("{} answered {s}", self.api_base),
            )
            .with_remediation("the index may be down; retry later"),
            Ok(_) => CheckResult::pass(
                CHECK_CONNECTIVITY,
                name,
                Severity::Blocking,
                format!("{} is reachable", self.api_base),
            ),
            Err(e) => CheckResult::fail(CHECK_CONNECTIVITY, name, Severity::Blocking, format!("{e:#}"))
                .with_remediation("check network access, proxy settings and index.api_base"),
        }
    }

    fn check_package_exists(&self, package: &str) -> CheckResult {
        let url = format!("{}/pypi/{package}/json", self.api_base);
        self.existence_check(CHECK_PACKAGE_EXISTS, "Package on index", &format!("package {package}"), &url)
    }

    fn check_version_exists(&self, package: &str, version: &str) -> CheckResult {
        let url = format!("{}/pypi/{package}/{version}/json", self.api_base);
        self.existence_check(
            CHECK_VERSION_EXISTS,
            "Version on index",
            &format!("{package} {version}"),
            &url,
        )
    }

    fn check_tls(&self) -> CheckResult {
        let name = "Index TLS certificate";
        if !self.api_base.starts_with("https://") {
            return CheckResult::fail(
                CHECK_TLS,
                name,
                Severity::Blocking,
                format!("{} does not use TLS", self.api_base),
            )
            .with_remediation("use an https:// index.api_base");
        }
        match self.status(&format!("{}/", self.api_base)) {
            Ok(_) => CheckResult::pass(
                CHECK_TLS,
                name,
                Severity::Blocking,
                "certificate chain verified",
            ),
            Err(e) => CheckResult::fail(CHECK_TLS, name, Severity::Blocking, format!("{e:#}"))
                .with_remediation("check the system clock and CA certificates"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::thread;

    use tiny_http::{Header, Response, Server, StatusCode as HttpStatus};

    use super::*;

    fn serve(routes: BTreeMap<&'static str, u16>, requests: usize) -> (String, thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").expect("server");
        let base_url = format!("http://{}", server.server_addr());
        let handle = thread::spawn(move || {
            for _ in 0..requests {
                let req = server.recv().expect("request");
                let status = routes.get(req.url()).copied().unwrap_or(404);
                let resp = Response::from_string("{}")
                    .with_status_code(HttpStatus(status))
                    .with_header(
                        Header::from_bytes("Content-Type", "application/json").expect("header"),
                    );
                req.respond(resp).expect("respond");
            }
        });
        (base_url, handle)
    }

    fn client(base: &str) -> IndexClient {
        IndexClient::new(base, Duration::from_secs(5)).expect("client")
    }

    #[test]
    fn package_and_version_lookups() {
        let routes = BTreeMap::from([
            ("/pypi/demo/json", 200),
            ("/pypi/demo/1.0.0/json", 200),
        ]);
        let (base, handle) = serve(routes, 3);
        let c = client(&base);

        assert!(c.check_package_exists("demo").passed);
        assert!(c.check_version_exists("demo", "1.0.0").passed);
        let missing = c.check_version_exists("demo", "9.9.9");
        assert!(!missing.passed);
        assert!(missing.message.contains("not found"));
        handle.join().expect("join");
    }

    #[test]
    fn connectivity_maps_server_errors() {
        let (base, handle) = serve(BTreeMap::from([("/", 503)]), 1);
        let result = client(&base).check_connectivity();
        assert!(result.is_blocking_failure());
        assert!(result.message.contains("503"));
        handle.join().expect("join");

        let (base, handle) = serve(BTreeMap::from([("/", 200)]), 1);
        assert!(client(&base).check_connectivity().passed);
        handle.join().expect("join");
    }

    #[test]
    fn unreachable_index_is_a_failed_check() {
        let server = Server::http("127.0.0.1:0").expect("server");
        let base = format!("http://{}", server.server_addr());
        drop(server);

        let result = client(&base).check_connectivity();
        assert!(!result.passed);
        assert!(result.remediation.is_some());
    }

    #[test]
    fn plain_http_fails_tls_check_without_a_request() {
        let result = client("http://127.0.0.1:9").check_tls();
        assert!(!result.passed);
        assert!(result.message.contains("does not use TLS"));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        assert_eq!(client("https://pypi.org/").api_base(), "https://pypi.org");
    }
}
