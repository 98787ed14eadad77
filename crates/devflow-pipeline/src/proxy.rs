//! リバースプロキシのルート生成
//!
//! ループバック以外のホストを持つサービスごとに、ホスト名とパスで振り分ける
//! ルートと、ワークロードの内部ポートを指すクラスタを生成します。

use crate::error::{PipelineError, Result};
use devflow_core::{Service, ROOT_PATH};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

const CATCH_ALL: &str = "{**catch-all}";

/// プロキシ設定（`proxy.json` のルート要素）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProxyConfig {
    #[serde(rename = "ReverseProxy")]
    pub reverse_proxy: ReverseProxy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReverseProxy {
    pub routes: BTreeMap<String, ProxyRoute>,
    pub clusters: BTreeMap<String, ProxyCluster>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProxyRoute {
    pub cluster_id: String,
    #[serde(rename = "Match")]
    pub route_match: RouteMatch,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteMatch {
    pub hosts: Vec<String>,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProxyCluster {
    pub destinations: BTreeMap<String, ProxyDestination>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProxyDestination {
    pub address: String,
}

impl ProxyConfig {
    pub fn routes(&self) -> &BTreeMap<String, ProxyRoute> {
        &self.reverse_proxy.routes
    }

    pub fn clusters(&self) -> &BTreeMap<String, ProxyCluster> {
        &self.reverse_proxy.clusters
    }

    pub fn is_empty(&self) -> bool {
        self.reverse_proxy.routes.is_empty()
    }

    /// サービスのルートとクラスタを追加
    ///
    /// ingress が未解決、ループバックホスト、remote runner のサービスは対象外で false を返します。
    pub fn add_service(&mut self, service: &Service) -> bool {
        let Some(ingress) = service.ingress() else {
            return false;
        };
        if ingress.is_loopback() || service.active_runner().is_remote() {
            return false;
        }

        let id = service.key().to_string();
        let prefix = ingress.path.trim_end_matches('/');

        let route = ProxyRoute {
            cluster_id: id.clone(),
            route_match: RouteMatch {
                hosts: vec![ingress.host.clone()],
                path: format!("{}/{}", prefix, CATCH_ALL),
            },
            transforms: if ingress.path == ROOT_PATH {
                Vec::new()
            } else {
                prefix_transforms(prefix)
            },
        };

        let address = format!(
            "{}://localhost:{}",
            service.active_runner().protocol.scheme(),
            ingress.internal_port
        );
        let cluster = ProxyCluster {
            destinations: BTreeMap::from([(service.name.clone(), ProxyDestination { address })]),
        };

        debug!(service = %service.name, host = %ingress.host, path = %ingress.path, "Proxy route added");
        self.reverse_proxy.routes.insert(id.clone(), route);
        self.reverse_proxy.clusters.insert(id, cluster);
        true
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::Unhandled(e.into()))
    }
}

/// パスプレフィックスを取り除き、元のプレフィックスを転送ヘッダーで伝える
fn prefix_transforms(prefix: &str) -> Vec<BTreeMap<String, String>> {
    let entry = |pairs: &[(&str, &str)]| {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>()
    };

    vec![
        entry(&[("PathRemovePrefix", prefix)]),
        entry(&[("X-Forwarded", "Set")]),
        entry(&[("RequestHeader", "X-Forwarded-Prefix"), ("Set", prefix)]),
    ]
}

/// 解決済みサービスからプロキシ設定を生成
pub fn synthesize<'a>(services: impl IntoIterator<Item = &'a Service>) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    for service in services {
        config.add_service(service);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_core::{Ingress, RunnerDefinition, ServiceDefinition};
    use serde_json::Value;
    use std::path::Path;

    fn service(name: &str, runner: RunnerDefinition, host: &str, path: &str, port: u16) -> Service {
        let mut service = Service::from_definition(
            name,
            ServiceDefinition {
                runners: vec![runner],
                ..Default::default()
            },
            Path::new("devflow.yaml"),
        )
        .unwrap();
        service
            .set_ingress(Ingress {
                host: host.to_string(),
                internal_port: port,
                external_port: Some(1347),
                path: path.to_string(),
            })
            .unwrap();
        service
    }

    fn remote() -> RunnerDefinition {
        RunnerDefinition {
            kind: "remote".to_string(),
            url: Some("https://api.example.com".to_string()),
            ..Default::default()
        }
    }

    fn openapi() -> RunnerDefinition {
        RunnerDefinition {
            kind: "openapi".to_string(),
            spec: Some("https://petstore3.swagger.io/api/v3/openapi.json".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_prefixed_route_strips_prefix() {
        let api = service("api", openapi(), "app.devflow.localhost", "/api/", 5123);
        let config = synthesize([&api]);

        let route = &config.routes()["api"];
        assert_eq!(route.route_match.hosts, vec!["app.devflow.localhost"]);
        assert_eq!(route.route_match.path, "/api/{**catch-all}");
        assert_eq!(route.transforms[0]["PathRemovePrefix"], "/api");
        assert_eq!(route.transforms[2]["Set"], "/api");

        let destination = &config.clusters()["api"].destinations["api"];
        assert_eq!(destination.address, "http://localhost:5123");
    }

    #[test]
    fn test_root_route_has_no_transforms() {
        let web = service("web", openapi(), "web.devflow.localhost", "/", 4000);
        let config = synthesize([&web]);

        let route = &config.routes()["web"];
        assert_eq!(route.route_match.path, "/{**catch-all}");
        assert!(route.transforms.is_empty());
    }

    #[test]
    fn test_skips_loopback_and_remote() {
        let local = service("local", openapi(), "localhost", "/", 4000);
        let external = service("external", remote(), "ext.devflow.localhost", "/", 4001);

        let config = synthesize([&local, &external]);
        assert!(config.is_empty());
    }

    #[test]
    fn test_json_layout() {
        let api = service("api", openapi(), "app.devflow.localhost", "/api", 5123);
        let json: Value = serde_json::from_str(&synthesize([&api]).to_json().unwrap()).unwrap();

        assert_eq!(
            json["ReverseProxy"]["Routes"]["api"]["Match"]["Path"],
            "/api/{**catch-all}"
        );
        assert_eq!(json["ReverseProxy"]["Routes"]["api"]["ClusterId"], "api");
        assert_eq!(
            json["ReverseProxy"]["Clusters"]["api"]["Destinations"]["api"]["Address"],
            "http://localhost:5123"
        );
    }
}
