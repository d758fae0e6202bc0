//! ingress-nginx controller health check.
//!
//! Covers the controller pods and services, the default TLS certificate
//! (secret, controller flag and certificate subject), the Ingress objects,
//! and a live connection to the Run:ai hostname including the certificate
//! it serves. Every check must pass.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::check::{CheckResult, PassPolicy, SuiteReport};
use crate::cluster::{Cluster, Container, List, ObjectMeta, QueryError, Secret, Service, Workload};
use crate::snapshot::collect::image_version;

use super::{pods_ready, query_failed};

pub const DEFAULT_NAMESPACE: &str = "ingress-nginx";
pub const DEFAULT_HTTPS_PORT: u16 = 443;

const CONTROLLER_SELECTOR: &str = "app.kubernetes.io/component=controller";
const CONTROLLER: &str = "ingress-nginx-controller";
const CONTROLLER_CONTAINER: &str = "controller";
const REQUIRED_SERVICES: [&str; 2] = ["ingress-nginx-controller", "ingress-nginx-controller-admission"];

pub const TLS_SECRET: &str = "ingress-server-default-tls";
const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";
const DEFAULT_CERT_FLAG: &str = "--default-ssl-certificate";
const CONTROLLER_FLAGS: [&str; 3] = [DEFAULT_CERT_FLAG, "--publish-service", "--ingress-class"];

/// The placeholder domain of a cluster whose ingress was never configured.
const PLACEHOLDER_DOMAIN: &str = "ingress.local";
const CONFIGURE_INGRESS: &str = "Run 'cm-kubernetes-setup' and select 'Configure Ingress'";

/// Ingress objects in this namespace carry the hostname that is connected to.
const RUNAI_BACKEND: &str = "runai-backend";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const X509_SUMMARY: [&str; 5] = ["x509", "-noout", "-subject", "-issuer", "-dates"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressOptions {
    pub namespace: String,
    pub https_port: u16,
}

impl Default for IngressOptions {
    fn default() -> Self {
        IngressOptions {
            namespace: DEFAULT_NAMESPACE.into(),
            https_port: DEFAULT_HTTPS_PORT,
        }
    }
}

// ---------------------------------------------------------------------------
// Ingress objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ingress {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: IngressSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(default)]
    pub ingress_class_name: Option<String>,
    #[serde(default)]
    pub rules: Vec<IngressRule>,
    #[serde(default)]
    pub tls: Vec<IngressTls>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngressRule {
    #[serde(default)]
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngressTls {
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl Ingress {
    pub fn key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }

    pub fn hosts(&self) -> Vec<&str> {
        self.spec.rules.iter().filter_map(|r| r.host.as_deref()).collect()
    }

    pub fn tls_hosts(&self) -> Vec<&str> {
        self.spec
            .tls
            .iter()
            .flat_map(|t| t.hosts.iter().map(String::as_str))
            .collect()
    }

    pub fn class(&self) -> &str {
        self.spec.ingress_class_name.as_deref().unwrap_or("not-set")
    }
}

/// The first host of the Run:ai backend ingress.
pub fn runai_host(ingresses: &[Ingress]) -> Option<&str> {
    ingresses
        .iter()
        .filter(|i| i.key().contains(RUNAI_BACKEND))
        .find_map(|i| i.hosts().first().copied())
}

fn joined_or_none(items: &[&str]) -> String {
    if items.is_empty() {
        "none".into()
    } else {
        items.join(", ")
    }
}

pub fn run(cluster: &Cluster, opts: &IngressOptions) -> SuiteReport {
    let mut report = SuiteReport::new("Ingress-NGINX Controller Health Check", PassPolicy::Strict);
    let ns = opts.namespace.as_str();
    report.context("Namespace", ns);

    let controller: Result<Workload, QueryError> = cluster.get("deployment", CONTROLLER, Some(ns));

    report.section("Controller");
    report.push(pods_ready(
        cluster,
        "Controller pods",
        ns,
        CONTROLLER_SELECTOR,
        "ingress-nginx controller pods",
    ));
    report.push(check_services(cluster, ns));

    report.section("TLS");
    report.push(check_default_certificate(cluster, ns, &controller));
    let ingresses: Result<Vec<Ingress>, QueryError> = cluster
        .kubectl_json::<List<Ingress>>(&["get", "ingress", "-A", "-o", "json"])
        .map(|l| l.items);
    report.push(check_ingresses(&ingresses));
    report.push(check_certificate_domain(cluster, ns));

    report.section("Endpoint");
    let host = ingresses.as_deref().ok().and_then(runai_host);
    report.push(check_connectivity(&ingresses, host, opts.https_port));
    report.push(check_served_certificate(cluster, host, opts.https_port));

    report.section("Configuration");
    report.push(check_controller(&controller));
    report
}

fn check_services(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Services";
    let services: Vec<Service> = match cluster.list("svc", Some(ns), None) {
        Ok(s) => s,
        Err(e) => return query_failed(NAME, "ingress-nginx services", &e),
    };
    let mut lines = Vec::new();
    for svc in &services {
        let name = svc.metadata.name.as_str();
        let address = svc.external_address().filter(|_| svc.kind() == "LoadBalancer");
        if let Some(address) = address {
            lines.push(format!("  {}: LoadBalancer, External IP: {}", name, address));
        } else if REQUIRED_SERVICES.contains(&name) {
            let ports: Vec<String> = svc
                .spec
                .ports
                .iter()
                .map(|p| {
                    format!(
                        "{}/{}",
                        p.port.map(|n| n.to_string()).unwrap_or_else(|| "?".into()),
                        p.protocol.as_deref().unwrap_or("TCP")
                    )
                })
                .collect();
            lines.push(format!(
                "  {}: {}, ClusterIP: {}, Ports: {}",
                name,
                svc.kind(),
                svc.cluster_ip(),
                ports.join(", ")
            ));
        }
    }
    let missing: Vec<&str> = REQUIRED_SERVICES
        .iter()
        .copied()
        .filter(|r| !services.iter().any(|s| s.metadata.name == *r))
        .collect();
    let detail = lines.join("\n");
    if missing.is_empty() {
        CheckResult::pass(NAME, format!("Found {} service(s)", lines.len())).with_detail(detail)
    } else {
        CheckResult::fail(NAME, format!("Missing required services: {}", missing.join(", ")))
            .with_detail(detail)
    }
}

fn controller_container(deployment: &Workload) -> Option<&Container> {
    deployment
        .spec
        .template
        .spec
        .containers
        .iter()
        .find(|c| c.name == CONTROLLER_CONTAINER)
}

fn check_default_certificate(
    cluster: &Cluster,
    ns: &str,
    controller: &Result<Workload, QueryError>,
) -> CheckResult {
    const NAME: &str = "Default TLS certificate";
    let secret: Secret = match cluster.get("secret", TLS_SECRET, Some(ns)) {
        Ok(s) => s,
        Err(e) => {
            return CheckResult::fail(
                NAME,
                format!("Secret '{}' not found in {} namespace", TLS_SECRET, ns),
            )
            .with_detail(e.to_string())
        }
    };
    if secret.kind != TLS_SECRET_TYPE {
        return CheckResult::fail(
            NAME,
            format!(
                "Secret has wrong type: {} (expected: {})",
                secret.kind, TLS_SECRET_TYPE
            ),
        );
    }
    let deployment = match controller {
        Ok(d) => d,
        Err(e) => return query_failed(NAME, "controller deployment", e),
    };
    let flag = format!("{}=", DEFAULT_CERT_FLAG);
    let configured = controller_container(deployment)
        .is_some_and(|c| c.args.iter().any(|a| a.contains(&flag) && a.contains(TLS_SECRET)));
    if configured {
        CheckResult::pass(NAME, "Secret exists and the controller serves it by default")
            .with_detail(format!(
                "  Secret: {}\n  Controller arg: {}=$(POD_NAMESPACE)/{}",
                TLS_SECRET, DEFAULT_CERT_FLAG, TLS_SECRET
            ))
    } else {
        CheckResult::fail(NAME, "Secret exists but the controller is not configured to use it")
    }
}

fn check_ingresses(ingresses: &Result<Vec<Ingress>, QueryError>) -> CheckResult {
    const NAME: &str = "Ingress resources";
    let ingresses = match ingresses {
        Ok(i) => i,
        Err(e) => return query_failed(NAME, "ingress resources", e),
    };
    if ingresses.is_empty() {
        return CheckResult::fail(NAME, "No ingress resources found in cluster");
    }
    let mut lines = Vec::new();
    for ing in ingresses {
        lines.push(format!("  {}:", ing.key()));
        lines.push(format!("    Hosts: {}", joined_or_none(&ing.hosts())));
        lines.push(format!("    TLS: {}", joined_or_none(&ing.tls_hosts())));
        lines.push(format!("    Class: {}", ing.class()));
    }
    CheckResult::pass(NAME, format!("Found {} ingress resource(s)", ingresses.len()))
        .with_detail(lines.join("\n"))
}

/// Subject, issuer and validity of a PEM certificate.
fn certificate_summary(cluster: &Cluster, pem: &str) -> Result<String, String> {
    cluster
        .local_stdin("openssl", &X509_SUMMARY, pem)
        .map(|out| out.trim().to_string())
        .map_err(|e| e.to_string())
}

fn check_certificate_domain(cluster: &Cluster, ns: &str) -> CheckResult {
    const NAME: &str = "Certificate domain";
    let pem = match cluster.kubectl(&[
        "get",
        "secret",
        TLS_SECRET,
        "-n",
        ns,
        "-o",
        r#"go-template={{index .data "tls.crt" | base64decode}}"#,
    ]) {
        Ok(p) if !p.trim().is_empty() => p,
        Ok(_) => return CheckResult::fail(NAME, "No certificate data found in secret"),
        Err(e) => {
            return CheckResult::fail(NAME, "Cannot retrieve TLS certificate secret")
                .with_detail(e.stderr())
        }
    };
    let info = match certificate_summary(cluster, &pem) {
        Ok(i) => i,
        Err(e) => {
            return CheckResult::fail(NAME, "Failed to parse certificate with openssl").with_detail(e)
        }
    };
    if info.to_lowercase().contains(PLACEHOLDER_DOMAIN) {
        return CheckResult::fail(
            NAME,
            format!("Certificate is for the default '{}' domain", PLACEHOLDER_DOMAIN),
        )
        .with_detail(info)
        .with_remediation(CONFIGURE_INGRESS);
    }
    CheckResult::pass(NAME, "Certificate is issued for the cluster domain").with_detail(info)
}

/// Open and drop a TCP connection to `host:port`.
pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<(), String> {
    let addrs = (host, port).to_socket_addrs().map_err(|e| e.to_string())?;
    let mut last = format!("{} did not resolve", host);
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return Ok(()),
            Err(e) => {
                debug!(%addr, error = %e, "connect failed");
                last = e.to_string();
            }
        }
    }
    Err(last)
}

fn check_connectivity(
    ingresses: &Result<Vec<Ingress>, QueryError>,
    host: Option<&str>,
    port: u16,
) -> CheckResult {
    const NAME: &str = "Endpoint connectivity";
    match ingresses {
        Ok(i) if !i.is_empty() => {}
        _ => return CheckResult::fail(NAME, "No ingress resources to connect to"),
    }
    let Some(host) = host else {
        return CheckResult::fail(NAME, "Could not find the Run:ai ingress hostname");
    };
    match connect(host, port, CONNECT_TIMEOUT) {
        Ok(()) => CheckResult::pass(NAME, format!("Connected to {}:{}", host, port)),
        Err(e) => CheckResult::fail(NAME, format!("Cannot connect to {}:{}", host, port)).with_detail(e),
    }
}

fn check_served_certificate(cluster: &Cluster, host: Option<&str>, port: u16) -> CheckResult {
    const NAME: &str = "TLS verification";
    let Some(host) = host else {
        return CheckResult::fail(NAME, "No hostname available to verify");
    };
    let target = format!("{}:{}", host, port);
    // s_client exits non-zero on some handshakes that still print the chain.
    let chain = match cluster.local_stdin(
        "openssl",
        &["s_client", "-connect", &target, "-servername", host],
        "",
    ) {
        Ok(out) => out,
        Err(e) => e.stdout().to_string(),
    };
    if !chain.contains("BEGIN CERTIFICATE") {
        return CheckResult::fail(NAME, format!("Failed to retrieve certificate from {}", target));
    }
    let info = match certificate_summary(cluster, &chain) {
        Ok(i) => i,
        Err(e) => {
            return CheckResult::fail(NAME, format!("Failed to read certificate from {}", target))
                .with_detail(e)
        }
    };
    let message = if info.contains(host) {
        format!("Certificate verified for {}", host)
    } else {
        format!("Certificate does not match {}", host)
    };
    CheckResult::expect(NAME, info.contains(host), message).with_detail(info)
}

fn check_controller(controller: &Result<Workload, QueryError>) -> CheckResult {
    const NAME: &str = "Controller configuration";
    let deployment = match controller {
        Ok(d) => d,
        Err(e) => return query_failed(NAME, "controller deployment", e),
    };
    let Some(container) = controller_container(deployment) else {
        return CheckResult::fail(NAME, "Controller container not found");
    };
    let replicas = deployment.replicas();
    let available = deployment.status.available_replicas.unwrap_or(0);

    let mut lines = vec![
        format!("  Image: {}", container.image),
        format!("  Version: {}", image_version(&container.image)),
        format!("  Replicas: {}/{} available", available, replicas),
        "  Configuration:".to_string(),
    ];
    let mut missing = Vec::new();
    for flag in CONTROLLER_FLAGS {
        let set = container.args.iter().any(|a| a.starts_with(flag));
        lines.push(format!("    {} {}", if set { "✓" } else { "✗" }, flag));
        if !set {
            missing.push(flag);
        }
    }
    let replicas_ok = replicas > 0 && available >= replicas;

    let mut issues = Vec::new();
    if !missing.is_empty() {
        issues.push(format!("Missing args: {}", missing.join(", ")));
    }
    if !replicas_ok {
        issues.push(format!("Replica issue: {}/{}", available, replicas));
    }
    let detail = lines.join("\n");
    if issues.is_empty() {
        CheckResult::pass(NAME, "Controller flags and replicas are in order").with_detail(detail)
    } else {
        CheckResult::fail(NAME, issues.join("; ")).with_detail(detail)
    }
}
