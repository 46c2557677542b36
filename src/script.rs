//! Generation of the post-extraction provisioning shell script.
//!
//! The generator is pure: the same parameters always yield byte-identical
//! script text, and no I/O happens here. Parameter values are supplied by an
//! external hosting API and treated as untrusted; nothing reaches the script
//! unescaped. Values embedded as shell words use POSIX single-quote escaping;
//! values embedded in `sed` substitution text use [`sed_escape`], and each
//! sed program is itself embedded as a single-quoted shell word so the
//! remote shell never evaluates the substitution text.
//!
//! The script is idempotent and keeps going past recoverable step failures:
//! every optional artifact is guarded by an existence check, and the
//! database import reports a marker line instead of aborting so the cleanup
//! steps that follow always run.

use std::borrow::Cow;

use camino::Utf8PathBuf;
use shell_escape::unix::escape;

/// Marker echoed when a database dump imported cleanly.
pub const DB_IMPORT_OK_MARKER: &str = "DB_IMPORT_OK";
/// Marker echoed when a database import was attempted and failed.
pub const DB_IMPORT_FAILED_MARKER: &str = "DB_IMPORT_FAILED";
/// Marker echoed when the package shipped no dump at all.
pub const DB_IMPORT_SKIPPED_MARKER: &str = "DB_IMPORT_SKIPPED";
/// Marker echoed as the script's final action, distinguishing "ran to its
/// natural end" from "remote shell died mid-script".
pub const COMPLETION_MARKER: &str = "SITEPROV_COMPLETE";

/// Placeholder token substituted with the table prefix throughout the dump.
const TABLE_PREFIX_TOKEN: &str = "@@PREFIX@@";
/// Directory the package ships its dump and installer metadata in.
const INSTALLER_DIR: &str = "installer";
/// Temporary file used when concatenating a multi-part dump.
const COMBINED_DUMP: &str = "installer/.combined.sql";

/// Provisioning inputs supplied by the hosting-control-panel collaborator.
///
/// All string values are untrusted and escaped before they are embedded in
/// generated shell text. The database user is provisioned under the
/// database name by the hosting panel, so no separate user field exists.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningParameters {
    /// Absolute path of the extracted site on the remote host.
    pub target_path: Utf8PathBuf,
    /// Destination subdirectory used for the rewrite-rules base path. May
    /// be empty when the site lives at the web root.
    pub base_path: String,
    /// Operating-system user that must own all provisioned files.
    pub owner_login_name: String,
    /// Database server host; `localhost`, `127.0.0.1`, or empty selects
    /// socket semantics.
    pub database_host: String,
    /// Database name, also used as the database user.
    pub database_name: String,
    /// Database password.
    pub database_password: String,
    /// Table prefix applied when the package carries no prefix metadata.
    pub table_prefix_fallback: String,
}

impl ProvisioningParameters {
    /// Returns true when the database host selects a local socket
    /// connection rather than a network one.
    #[must_use]
    pub fn database_host_is_local(&self) -> bool {
        matches!(self.database_host.as_str(), "" | "localhost" | "127.0.0.1")
    }
}

/// Immutable provisioning script text, produced fresh per request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GeneratedScript {
    text: String,
}

impl GeneratedScript {
    /// The script text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consumes the script, yielding the text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.text
    }
}

/// Escapes a value for embedding in `sed` substitution text.
///
/// Backslash, single quote, ampersand, and forward slash are
/// backslash-escaped; everything else passes through unchanged.
#[must_use]
pub fn sed_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '\'' | '&' | '/') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Escapes a value for embedding as a single shell word.
fn shell_quote(raw: &str) -> String {
    escape(Cow::Borrowed(raw)).into_owned()
}

/// Builds provisioning scripts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptGenerator {
    mysql_bin: String,
}

impl Default for ScriptGenerator {
    fn default() -> Self {
        Self::new("mysql")
    }
}

impl ScriptGenerator {
    /// Creates a generator that invokes the given database client binary.
    pub fn new(mysql_bin: impl Into<String>) -> Self {
        Self {
            mysql_bin: mysql_bin.into(),
        }
    }

    /// Generates the provisioning script for the given parameters.
    ///
    /// The script aborts only when the target directory is missing; every
    /// later step tolerates absent artifacts and the import steps echo
    /// marker lines instead of aborting, so cleanup always runs.
    #[must_use]
    pub fn generate(&self, params: &ProvisioningParameters) -> GeneratedScript {
        let mut text = String::new();
        text.push_str("#!/bin/sh\n");

        self.emit_enter_target(&mut text, params);
        self.emit_rewrite_rules(&mut text, params);
        self.emit_site_config(&mut text, params);
        self.emit_database_import(&mut text, params);
        self.emit_artifact_removal(&mut text);
        self.emit_ownership_reset(&mut text, params);

        text.push_str(&format!("echo \"{COMPLETION_MARKER}\"\n"));
        GeneratedScript { text }
    }

    fn emit_enter_target(&self, text: &mut String, params: &ProvisioningParameters) {
        let target = shell_quote(params.target_path.as_str());
        text.push_str(&format!("cd {target} || exit 1\n"));
    }

    /// Restores the rewrite-rules file, points its base path at the
    /// destination subdirectory, and normalizes its permissions.
    fn emit_rewrite_rules(&self, text: &mut String, params: &ProvisioningParameters) {
        let owner = shell_quote(&params.owner_login_name);
        let rewrite_base = if params.base_path.is_empty() {
            "/".to_owned()
        } else {
            format!("/{}/", params.base_path)
        };
        let base = sed_escape(&rewrite_base);

        text.push_str("if [ -f .htaccess.orig ]; then\n");
        text.push_str("  mv -f .htaccess.orig .htaccess\n");
        text.push_str("elif [ -f htaccess.sample ] && [ ! -f .htaccess ]; then\n");
        text.push_str("  cp htaccess.sample .htaccess\n");
        text.push_str("fi\n");
        let expr = shell_quote(&format!("s/^RewriteBase .*/RewriteBase {base}/"));

        text.push_str("if [ -f .htaccess ]; then\n");
        text.push_str(&format!("  sed -i {expr} .htaccess\n"));
        text.push_str("  chmod 644 .htaccess\n");
        text.push_str(&format!("  chown {owner}:{owner} .htaccess\n"));
        text.push_str("fi\n");
    }

    /// Rewrites the database fields of the site configuration file. Each
    /// field is rewritten independently so a missing field does not block
    /// the others.
    fn emit_site_config(&self, text: &mut String, params: &ProvisioningParameters) {
        let owner = shell_quote(&params.owner_login_name);
        let host = sed_escape(&params.database_host);
        let name = sed_escape(&params.database_name);
        let password = sed_escape(&params.database_password);

        text.push_str("if [ -f wp-config.php ]; then\n");
        for (field, value) in [
            ("DB_HOST", &host),
            ("DB_USER", &name),
            ("DB_PASSWORD", &password),
            ("DB_NAME", &name),
        ] {
            // The whole sed program is one single-quoted shell word, so
            // the untrusted replacement text reaches sed verbatim and the
            // shell never evaluates it.
            let expr = shell_quote(&format!(
                "s/define( *'{field}'.*/define('{field}', '{value}');/"
            ));
            text.push_str(&format!("  sed -i {expr} wp-config.php\n"));
        }
        text.push_str("  chmod 640 wp-config.php\n");
        text.push_str(&format!("  chown {owner}:{owner} wp-config.php\n"));
        text.push_str("fi\n");
    }

    /// Database import in priority order: multi-part dump, conventional
    /// single dump, fallback discovery, or nothing (not an error).
    fn emit_database_import(&self, text: &mut String, params: &ProvisioningParameters) {
        let prefix_fallback = shell_quote(&params.table_prefix_fallback);
        let import = self.mysql_command(params);

        text.push_str(&format!("DB_PREFIX={prefix_fallback}\n"));
        text.push_str(&format!(
            "if [ -f {INSTALLER_DIR}/database.sql ] && ls {INSTALLER_DIR}/database.s[0-9][0-9] >/dev/null 2>&1; then\n"
        ));
        text.push_str(&format!(
            "  if [ -f {INSTALLER_DIR}/database-meta.txt ]; then\n"
        ));
        text.push_str(&format!(
            "    DB_PREFIX=$(cat {INSTALLER_DIR}/database-meta.txt)\n"
        ));
        text.push_str("  fi\n");
        text.push_str(&format!(
            "  cat {INSTALLER_DIR}/database.sql {INSTALLER_DIR}/database.s[0-9][0-9] > {COMBINED_DUMP}\n"
        ));
        text.push_str(&format!(
            "  sed -i \"s/{TABLE_PREFIX_TOKEN}/$DB_PREFIX/g\" {COMBINED_DUMP}\n"
        ));
        self.emit_import_attempt(text, &import, COMBINED_DUMP);
        text.push_str(&format!("  rm -f {COMBINED_DUMP}\n"));
        text.push_str(&format!(
            "elif [ -f {INSTALLER_DIR}/database.sql ]; then\n"
        ));
        self.emit_import_attempt(text, &import, "installer/database.sql");
        text.push_str("else\n");
        text.push_str(&format!(
            "  FALLBACK_SQL=$(find {INSTALLER_DIR} -maxdepth 1 -name '*.sql' ! -name '*.s[0-9][0-9]*' 2>/dev/null | head -n 1)\n"
        ));
        text.push_str("  if [ -n \"$FALLBACK_SQL\" ]; then\n");
        text.push_str(&format!(
            "    if {import} < \"$FALLBACK_SQL\"; then echo \"{DB_IMPORT_OK_MARKER}\"; else echo \"{DB_IMPORT_FAILED_MARKER}\"; fi\n"
        ));
        text.push_str("  else\n");
        text.push_str(&format!("    echo \"{DB_IMPORT_SKIPPED_MARKER}\"\n"));
        text.push_str("  fi\n");
        text.push_str("fi\n");
    }

    fn emit_import_attempt(&self, text: &mut String, import: &str, dump: &str) {
        text.push_str(&format!(
            "  if {import} < {dump}; then echo \"{DB_IMPORT_OK_MARKER}\"; else echo \"{DB_IMPORT_FAILED_MARKER}\"; fi\n"
        ));
    }

    /// Builds the database client invocation. A local host omits `-h` so
    /// the client connects over its socket; a remote host connects over the
    /// network.
    fn mysql_command(&self, params: &ProvisioningParameters) -> String {
        let bin = shell_quote(&self.mysql_bin);
        let user = shell_quote(&params.database_name);
        let password = shell_quote(&params.database_password);
        let name = shell_quote(&params.database_name);

        if params.database_host_is_local() {
            format!("{bin} -u {user} -p{password} {name}")
        } else {
            let host = shell_quote(&params.database_host);
            format!("{bin} -h {host} -u {user} -p{password} {name}")
        }
    }

    fn emit_artifact_removal(&self, text: &mut String) {
        text.push_str(&format!("rm -rf {INSTALLER_DIR}\n"));
        text.push_str("rm -f extractor.php\n");
        text.push_str("rm -f ./*.zip ./*.daf\n");
    }

    fn emit_ownership_reset(&self, text: &mut String, params: &ProvisioningParameters) {
        let owner = shell_quote(&params.owner_login_name);
        text.push_str(&format!("chown -R {owner}:{owner} .\n"));
    }
}
