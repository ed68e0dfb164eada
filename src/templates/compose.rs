//! Deployment descriptor (`docker-compose.yml`).

use std::collections::BTreeMap;

use serde::ser::SerializeMap as _;
use serde::{Serialize, Serializer};

use super::{instance_dir, project_relative, Artifact};
use crate::error::Result;
use crate::paths::{container, COMPOSE_FILE};
use crate::project::{InstanceConfig, ProjectConfiguration};
use crate::settings::LauncherSettings;

#[derive(Debug, Serialize)]
struct ComposeFile {
    name: String,
    services: Services,
    networks: BTreeMap<String, ExternalNetwork>,
}

/// Services keyed by container name, serialized in insertion order.
#[derive(Debug, Default)]
struct Services(Vec<(String, Service)>);

impl Services {
    fn push(&mut self, name: &str, service: Service) {
        self.0.push((name.to_string(), service));
    }
}

impl Serialize for Services {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, service) in &self.0 {
            map.serialize_entry(name, service)?;
        }
        map.end()
    }
}

#[derive(Debug, Serialize)]
struct ExternalNetwork {
    name: String,
    external: bool,
}

#[derive(Debug, Default, Serialize)]
struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<Build>,
    container_name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<String, String>,
    ports: Vec<String>,
    volumes: Vec<String>,
    networks: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    depends_on: BTreeMap<String, DependsOn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    healthcheck: Option<Healthcheck>,
    restart: &'static str,
}

#[derive(Debug, Serialize)]
struct Build {
    context: String,
    dockerfile: &'static str,
}

#[derive(Debug, Serialize)]
struct DependsOn {
    condition: &'static str,
}

#[derive(Debug, Serialize)]
struct Healthcheck {
    test: Vec<String>,
    interval: String,
    retries: u32,
}

/// Build the descriptor. Instances that never launched are left out unless
/// `include_all` is set.
pub fn compose_descriptor(
    project: &ProjectConfiguration,
    settings: &LauncherSettings,
    include_all: bool,
) -> Result<Artifact> {
    let network = project.network_name();
    let healthcheck = |test: Vec<String>| Healthcheck {
        test,
        interval: format!("{}s", settings.readiness_interval_secs.max(1)),
        retries: settings.readiness_attempts.max(1),
    };

    let mut services = Services::default();

    let db = &project.database;
    services.push(
        &db.container_name,
        Service {
            image: Some(settings.database_image.clone()),
            container_name: db.container_name.clone(),
            environment: BTreeMap::from([
                ("ACCEPT_EULA".to_string(), "Y".to_string()),
                ("MSSQL_SA_PASSWORD".to_string(), db.password.clone()),
                ("DB_USER".to_string(), db.user.clone()),
                ("DB_PASSWORD".to_string(), db.password.clone()),
            ]),
            ports: vec![format!("{}:{}", db.port, container::DATABASE_PORT)],
            volumes: vec![format!(
                "{}:{}",
                project_relative(project, &db.volume_path),
                container::DATABASE_DATA
            )],
            networks: vec![network.clone()],
            healthcheck: Some(healthcheck(vec![
                "CMD-SHELL".to_string(),
                format!(
                    "{} -S localhost -U \"$$DB_USER\" -P \"$$DB_PASSWORD\" -Q 'SELECT 1' || exit 1",
                    super::restore::SQLCMD
                ),
            ])),
            restart: "unless-stopped",
            ..Default::default()
        },
    );

    let admin = &project.admin_ui;
    services.push(
        &admin.container_name,
        Service {
            image: Some(settings.admin_ui_image.clone()),
            container_name: admin.container_name.clone(),
            environment: BTreeMap::from([(
                "ADMINER_DEFAULT_SERVER".to_string(),
                db.container_name.clone(),
            )]),
            ports: vec![format!("{}:{}", admin.port, container::ADMIN_UI_PORT)],
            volumes: vec![format!(
                "{}:{}",
                project_relative(project, &admin.volume_path),
                container::ADMIN_UI_DATA
            )],
            networks: vec![network.clone()],
            depends_on: BTreeMap::from([(
                db.container_name.clone(),
                DependsOn {
                    condition: "service_started",
                },
            )]),
            restart: "unless-stopped",
            ..Default::default()
        },
    );

    let cache = &project.cache;
    services.push(
        &cache.container_name,
        Service {
            image: Some(settings.cache_image.clone()),
            container_name: cache.container_name.clone(),
            ports: vec![format!("{}:{}", cache.port, container::CACHE_PORT)],
            volumes: vec![format!(
                "{}:{}",
                project_relative(project, &cache.volume_path),
                container::CACHE_DATA
            )],
            networks: vec![network.clone()],
            healthcheck: Some(healthcheck(vec![
                "CMD".to_string(),
                "redis-cli".to_string(),
                "ping".to_string(),
            ])),
            restart: "unless-stopped",
            ..Default::default()
        },
    );

    let broker = &project.broker;
    services.push(
        &broker.container_name,
        Service {
            image: Some(settings.broker_image.clone()),
            container_name: broker.container_name.clone(),
            environment: BTreeMap::from([
                ("RABBITMQ_DEFAULT_USER".to_string(), broker.user.clone()),
                ("RABBITMQ_DEFAULT_PASS".to_string(), broker.password.clone()),
            ]),
            ports: vec![
                format!("{}:{}", broker.port, container::BROKER_PORT),
                format!(
                    "{}:{}",
                    broker.management_port,
                    container::BROKER_MANAGEMENT_PORT
                ),
            ],
            volumes: vec![format!(
                "{}:{}",
                project_relative(project, &broker.volume_path),
                container::BROKER_DATA
            )],
            networks: vec![network.clone()],
            restart: "unless-stopped",
            ..Default::default()
        },
    );

    for instance in project
        .instances
        .iter()
        .filter(|i| include_all || i.is_launched())
    {
        services.push(
            &instance.container_name,
            instance_service(project, instance, &network),
        );
    }

    let file = ComposeFile {
        name: crate::project::slug(&project.name),
        services,
        networks: BTreeMap::from([(
            network.clone(),
            ExternalNetwork {
                name: network,
                external: true,
            },
        )]),
    };

    Ok(Artifact::new(COMPOSE_FILE, serde_yaml::to_string(&file)?))
}

fn instance_service(
    project: &ProjectConfiguration,
    instance: &InstanceConfig,
    network: &str,
) -> Service {
    let app = format!("./{}", instance_dir(project, instance).to_string_lossy().replace('\\', "/"));
    Service {
        build: Some(Build {
            context: app.clone(),
            dockerfile: "Dockerfile",
        }),
        container_name: instance.container_name.clone(),
        environment: BTreeMap::from([(
            "DB_ENGINE".to_string(),
            instance.db_engine_tag.clone(),
        )]),
        ports: vec![format!("{}:{}", instance.port, container::INSTANCE_PORT)],
        volumes: vec![
            format!("{}:{}", app, container::INSTANCE_ROOT),
            format!(
                "{}:{}",
                project_relative(project, &instance.volume_path),
                container::INSTANCE_DATA
            ),
        ],
        networks: vec![network.to_string()],
        depends_on: BTreeMap::from([
            (
                project.database.container_name.clone(),
                DependsOn {
                    condition: "service_healthy",
                },
            ),
            (
                project.cache.container_name.clone(),
                DependsOn {
                    condition: "service_healthy",
                },
            ),
            (
                project.broker.container_name.clone(),
                DependsOn {
                    condition: "service_started",
                },
            ),
        ]),
        restart: "unless-stopped",
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::testutil::ProjectFixture;

    fn fixture() -> ProjectFixture {
        let mut fixture = ProjectFixture::new(&["site-a", "site-b"]);
        fixture.config.instances[0].launched_at = Some(Utc::now());
        fixture
    }

    fn service_names(yaml: &str) -> Vec<String> {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        doc["services"]
            .as_mapping()
            .unwrap()
            .keys()
            .map(|k| k.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn omits_unlaunched_instances_unless_include_all() {
        let fixture = fixture();
        let settings = LauncherSettings::default();

        let partial = compose_descriptor(&fixture.config, &settings, false).unwrap();
        assert_eq!(
            service_names(&partial.contents),
            vec!["demo-db", "demo-admin", "demo-cache", "demo-broker", "site-a"]
        );

        let full = compose_descriptor(&fixture.config, &settings, true).unwrap();
        assert_eq!(
            service_names(&full.contents),
            vec!["demo-db", "demo-admin", "demo-cache", "demo-broker", "site-a", "site-b"]
        );
        assert_eq!(full.relative_path, std::path::PathBuf::from(COMPOSE_FILE));
    }

    #[test]
    fn generation_is_byte_identical_across_calls() {
        let fixture = fixture();
        let settings = LauncherSettings::default();
        for include_all in [false, true] {
            let a = compose_descriptor(&fixture.config, &settings, include_all).unwrap();
            let b = compose_descriptor(&fixture.config, &settings, include_all).unwrap();
            assert_eq!(a.contents, b.contents);
        }
    }

    #[test]
    fn paths_are_relative_and_network_is_external() {
        let fixture = fixture();
        let artifact = compose_descriptor(&fixture.config, &LauncherSettings::default(), true).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&artifact.contents).unwrap();

        assert_eq!(doc["services"]["demo-db"]["volumes"][0], "./data/db:/var/opt/mssql");
        assert_eq!(doc["services"]["site-b"]["build"]["context"], "./apps/site-b");
        assert_eq!(doc["services"]["site-b"]["ports"][0], "8101:80");
        assert_eq!(
            doc["services"]["site-b"]["depends_on"]["demo-db"]["condition"],
            "service_healthy"
        );
        assert_eq!(doc["networks"]["demo_net"]["external"], true);
        assert_eq!(doc["services"]["demo-cache"]["networks"][0], "demo_net");
        assert!(!artifact.contents.contains(&fixture.root().to_string_lossy().to_string()));
    }

    #[test]
    fn database_healthcheck_uses_configured_credentials() {
        let mut fixture = fixture();
        fixture.config.database.user = "deploy".to_string();
        let artifact = compose_descriptor(&fixture.config, &LauncherSettings::default(), false).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&artifact.contents).unwrap();
        let db = &doc["services"]["demo-db"];

        assert_eq!(db["environment"]["DB_USER"], "deploy");
        assert_eq!(db["environment"]["DB_PASSWORD"], "Str0ng!Passw0rd");
        let probe = db["healthcheck"]["test"][1].as_str().unwrap();
        assert!(probe.contains(r#"-U "$$DB_USER" -P "$$DB_PASSWORD""#), "{probe}");
        assert!(!probe.contains("MSSQL_SA_PASSWORD"));
    }
}
