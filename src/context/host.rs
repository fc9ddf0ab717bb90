//! Origin process metadata stamped onto envelopes, faults and error headers.

use serde::{Deserialize, Serialize};

use super::headers::{self, Headers};

/// Describes the process that produced a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub machine_name: String,
    pub process_name: String,
    pub process_id: u32,
    pub assembly: String,
    pub assembly_version: String,
    pub framework_version: String,
    pub host_library_version: String,
    pub operating_system_version: String,
}

impl HostInfo {
    /// Host information for the current process.
    ///
    /// `assembly` names the application; when unset it falls back to the
    /// executable name.
    pub fn current(assembly: Option<&str>, machine_name: Option<&str>) -> Self {
        let process_name = std::env::current_exe()
            .ok()
            .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            machine_name: machine_name
                .map(str::to_string)
                .unwrap_or_else(machine_name_from_env),
            assembly: assembly
                .map(str::to_string)
                .unwrap_or_else(|| process_name.clone()),
            process_name,
            process_id: std::process::id(),
            assembly_version: String::new(),
            framework_version: env!("SOURCED_BUS_RUSTC_VERSION").to_string(),
            host_library_version: concat!("sourced_bus ", env!("CARGO_PKG_VERSION")).to_string(),
            operating_system_version: format!(
                "{} {}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
        }
    }

    /// Set the application version reported as `assemblyVersion`.
    pub fn with_assembly_version(mut self, version: impl Into<String>) -> Self {
        self.assembly_version = version.into();
        self
    }

    /// Write this host's metadata as `sb-host-*` headers.
    pub fn write_headers(&self, target: &mut Headers) {
        target.set(headers::HOST_MACHINE_NAME, &self.machine_name);
        target.set(headers::HOST_PROCESS_NAME, &self.process_name);
        target.set(headers::HOST_PROCESS_ID, self.process_id.to_string());
        target.set(headers::HOST_ASSEMBLY, &self.assembly);
        target.set(headers::HOST_ASSEMBLY_VERSION, &self.assembly_version);
        target.set(headers::HOST_FRAMEWORK_VERSION, &self.framework_version);
        target.set(headers::HOST_LIBRARY_VERSION, &self.host_library_version);
        target.set(
            headers::HOST_OPERATING_SYSTEM_VERSION,
            &self.operating_system_version,
        );
    }
}

fn machine_name_from_env() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_host_uses_overrides() {
        let host = HostInfo::current(Some("orders-api"), Some("node-7"));
        assert_eq!(host.assembly, "orders-api");
        assert_eq!(host.machine_name, "node-7");
        assert_eq!(host.process_id, std::process::id());
        assert!(host.host_library_version.starts_with("sourced_bus "));
    }

    #[test]
    fn writes_host_prefixed_headers() {
        let host = HostInfo::current(Some("orders-api"), Some("node-7"));
        let mut target = Headers::new();
        host.write_headers(&mut target);

        assert_eq!(target.get(headers::HOST_MACHINE_NAME), Some("node-7"));
        assert!(target.iter().all(|(k, _)| k.starts_with(headers::HOST_PREFIX)));
    }

    #[test]
    fn serializes_camel_case() {
        let host = HostInfo::current(Some("a"), Some("m"));
        let json = serde_json::to_value(&host).unwrap();
        for key in [
            "machineName",
            "processName",
            "processId",
            "assembly",
            "assemblyVersion",
            "frameworkVersion",
            "hostLibraryVersion",
            "operatingSystemVersion",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
