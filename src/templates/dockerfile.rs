use super::{instance_dir, Artifact};
use crate::paths::container;
use crate::project::{InstanceConfig, ProjectConfiguration};
use crate::settings::LauncherSettings;

/// Instance image, based on the runtime the instance targets.
pub fn dockerfile(
    project: &ProjectConfiguration,
    instance: &InstanceConfig,
    settings: &LauncherSettings,
) -> Artifact {
    let contents = format!(
        "FROM {base}:{runtime}\n\
         ARG DB_ENGINE={engine}\n\
         ENV DB_ENGINE=${{DB_ENGINE}}\n\
         WORKDIR {root}\n\
         VOLUME {data}\n\
         EXPOSE {port}\n",
        base = settings.instance_base_image,
        runtime = instance.runtime_tag,
        engine = instance.db_engine_tag,
        root = container::INSTANCE_ROOT,
        data = container::INSTANCE_DATA,
        port = container::INSTANCE_PORT,
    );
    Artifact::new(instance_dir(project, instance).join("Dockerfile"), contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ProjectFixture;

    #[test]
    fn uses_runtime_tag_and_engine_arg() {
        let fixture = ProjectFixture::new(&["site"]);
        let artifact = dockerfile(
            &fixture.config,
            &fixture.config.instances[0],
            &LauncherSettings::default(),
        );
        assert_eq!(
            artifact.contents.lines().next(),
            Some("FROM mcr.microsoft.com/dotnet/framework/aspnet:4.8")
        );
        assert!(artifact.contents.contains("ARG DB_ENGINE=mssql2019\n"));
        assert!(artifact.contents.contains("ENV DB_ENGINE=${DB_ENGINE}\n"));
        assert_eq!(
            artifact.relative_path,
            std::path::PathBuf::from("apps/site/Dockerfile")
        );
    }
}
