//! Database restore script, installed into the database volume.

use std::path::PathBuf;

use super::{project_relative, Artifact};
use crate::project::ProjectConfiguration;

pub const RESTORE_SCRIPT: &str = "restore-db.sh";

/// Query tool shipped in the database image.
pub(crate) const SQLCMD: &str = "/opt/mssql-tools/bin/sqlcmd";

const TEMPLATE: &str = r#"#!/bin/bash
# usage: restore-db.sh <database> <backup file> [user]
# Restores the backup into <database> unless that database already exists.
set -euo pipefail

DB_NAME="$1"
BACKUP="$2"
DB_USER="${3:-${DB_USER:-sa}}"
DB_PASSWORD="${DB_PASSWORD:-$MSSQL_SA_PASSWORD}"
DATA_DIR="@DATA_DIR@/data"

sql() {
  @SQLCMD@ -S localhost -U "$DB_USER" -P "$DB_PASSWORD" -h -1 -W "$@"
}

exists=$(sql -Q "SET NOCOUNT ON; SELECT COUNT(*) FROM sys.databases WHERE name = N'$DB_NAME'" | tr -d '[:space:]')
if [ "$exists" != "0" ]; then
  echo "Database $DB_NAME already exists, skipping restore"
  exit 0
fi

moves=""
index=0
while IFS='|' read -r logical _physical type _rest; do
  [ -z "$logical" ] && continue
  if [ "$type" = "L" ]; then
    target="$DATA_DIR/${DB_NAME}_log${index}.ldf"
  else
    target="$DATA_DIR/${DB_NAME}${index}.mdf"
  fi
  moves="$moves MOVE N'$logical' TO N'$target',"
  index=$((index + 1))
done < <(sql -s '|' -Q "SET NOCOUNT ON; RESTORE FILELISTONLY FROM DISK = N'$BACKUP'")

echo "Restoring $BACKUP into $DB_NAME"
sql -Q "RESTORE DATABASE [$DB_NAME] FROM DISK = N'$BACKUP' WITH ${moves} RECOVERY"
echo "Database $DB_NAME restored"
"#;

/// `restore-db.sh`, placed in `<database volume>/backups/`.
pub fn restore_script(project: &ProjectConfiguration) -> Artifact {
    let dir = project_relative(project, &project.database.volume_path);
    let dir = dir.strip_prefix("./").unwrap_or(&dir);
    let contents = TEMPLATE
        .replace("@DATA_DIR@", crate::paths::container::DATABASE_DATA)
        .replace("@SQLCMD@", SQLCMD);
    Artifact::new(PathBuf::from(dir).join("backups").join(RESTORE_SCRIPT), contents).executable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ProjectFixture;

    #[test]
    fn lands_in_database_backup_dir() {
        let fixture = ProjectFixture::new(&["site"]);
        let artifact = restore_script(&fixture.config);
        assert_eq!(
            artifact.relative_path,
            PathBuf::from("data/db/backups/restore-db.sh")
        );
        assert!(artifact.executable);
    }

    #[test]
    fn skips_existing_databases() {
        let fixture = ProjectFixture::new(&["site"]);
        let contents = restore_script(&fixture.config).contents;
        assert!(contents.contains("already exists, skipping restore"));
        assert!(contents.contains("DATA_DIR=\"/var/opt/mssql/data\""));
        assert!(!contents.contains("@DATA_DIR@"));
        assert!(!contents.contains("@SQLCMD@"));
    }

    #[test]
    fn authenticates_with_the_configured_password() {
        let fixture = ProjectFixture::new(&["site"]);
        let contents = restore_script(&fixture.config).contents;
        assert!(contents.contains(r#"-U "$DB_USER" -P "$DB_PASSWORD""#));
        assert!(contents.contains(r#"DB_PASSWORD="${DB_PASSWORD:-$MSSQL_SA_PASSWORD}""#));
    }
}
