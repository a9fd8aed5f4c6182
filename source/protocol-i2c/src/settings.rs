//! # Protocol settings
//!
//! [`ProtocolSettings`] may be built in code, or rendered from a TOML file at
//! build time and embedded in the firmware image.
//!
//! ## In a `build.rs` script
//!
//! ```toml
//! [build-dependencies]
//! protocol-i2c = { path = "../../source/protocol-i2c", features = ["use-std"] }
//! ```
//!
//! ```rust,ignore
//! use protocol_i2c::settings::buildtime::render_file;
//! fn main() {
//!     render_file("device.toml").unwrap();
//! }
//! ```
//!
//! ## In the firmware
//!
//! ```rust,ignore
//! let settings = protocol_i2c::include_settings!().unwrap();
//! ```

use core::fmt;
use i2c_tlv_proto::{DEFAULT_ADDRESS, IDLE_BYTE};
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILE_VAR: &str = "PROTOCOL_I2C_SETTINGS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProtocolSettings {
    /// 7-bit address the target answers to.
    pub address: u8,
    /// Byte clocked out when a read runs past the end of a response.
    pub idle_byte: u8,
    /// Persist from [`ProtocolI2c::poll`] when the controller sends a
    /// `Save` command.
    ///
    /// [`ProtocolI2c::poll`]: crate::ProtocolI2c::poll
    pub save_on_request: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// Not a 7-bit address, or one of the reserved I<sup>2</sup>C addresses.
    InvalidAddress(u8),
}

// === impl ProtocolSettings ===

impl ProtocolSettings {
    /// Addresses outside this range are either wider than 7 bits or reserved
    /// by the I<sup>2</sup>C specification.
    pub const VALID_ADDRESSES: core::ops::RangeInclusive<u8> = 0x08..=0x77;

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !Self::VALID_ADDRESSES.contains(&self.address) {
            return Err(SettingsError::InvalidAddress(self.address));
        }
        Ok(())
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            idle_byte: IDLE_BYTE,
            save_on_request: true,
        }
    }
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::InvalidAddress(addr) => {
                write!(f, "invalid 7-bit target address {addr:#04x}")
            }
        }
    }
}

/// Tools intended for use in build.rs scripts
#[cfg(feature = "use-std")]
pub mod buildtime {
    const OUT_DIR: &str = "OUT_DIR";
    const TAG: &str = concat!(module_path!(), ":");

    use std::{io::Write, path::Path};

    use super::*;
    use miette::{Context, IntoDiagnostic, Result};

    pub fn from_toml(s: &str) -> Result<ProtocolSettings> {
        let settings: ProtocolSettings = toml::from_str(s).into_diagnostic()?;
        settings.validate().map_err(|error| {
            miette::MietteDiagnostic::new(error.to_string())
                .with_help("use an address in the range 0x08..=0x77")
        })?;
        Ok(settings)
    }

    /// Render the settings file at `path`. The result is made available to
    /// the firmware through [`include_settings!()`](crate::include_settings).
    pub fn render_file(path: impl AsRef<Path>) -> Result<()> {
        let out_dir = std::env::var(OUT_DIR)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read '{OUT_DIR}' env variable"))?;
        eprintln!("{TAG} {OUT_DIR}='{out_dir}'");
        render_file_to(path, out_dir)
    }

    fn render_file_to(path: impl AsRef<Path>, out: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let path_disp = path.display();

        (|| {
            let filename = path
                .file_name()
                .ok_or_else(|| miette::miette!("Path has no filename!"))?;
            eprintln!("{TAG} rendering settings file '{path_disp}'");
            let cfg = std::fs::read_to_string(path).into_diagnostic()?;
            let settings = from_toml(&cfg)?;

            let mut out = out.as_ref().join(filename);
            out.set_extension("postcard");
            let bin_cfg = postcard::to_stdvec(&settings).into_diagnostic()?;
            let mut f = std::fs::File::create(&out).into_diagnostic()?;
            f.write_all(&bin_cfg).into_diagnostic()?;
            println!("cargo:rustc-env={SETTINGS_FILE_VAR}={}", out.display());
            println!("cargo:rerun-if-changed={path_disp}");

            Ok::<_, miette::Report>(())
        })()
        .wrap_err_with(|| format!("Failed to render settings file '{path_disp}'"))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn toml_overrides_defaults() {
            let settings = from_toml("address = 0x42\nsave_on_request = false\n").unwrap();
            assert_eq!(
                settings,
                ProtocolSettings {
                    address: 0x42,
                    save_on_request: false,
                    ..Default::default()
                }
            );
        }

        #[test]
        fn toml_rejects_bad_address() {
            assert!(from_toml("address = 0x7f\n").is_err());
            assert!(from_toml("adress = 0x42\n").is_err());
        }

        #[test]
        fn missing_out_dir_is_named() {
            std::env::remove_var(OUT_DIR);
            let error = render_file("device.toml").unwrap_err();
            assert_eq!(error.to_string(), "Failed to read 'OUT_DIR' env variable");
        }

        #[test]
        fn renders_postcard() {
            let dir = std::env::temp_dir().join(format!("protocol-i2c-{}", std::process::id()));
            std::fs::create_dir_all(&dir).unwrap();
            let src = dir.join("device.toml");
            std::fs::write(&src, "address = 0x21\n").unwrap();

            render_file_to(&src, &dir).unwrap();

            let bytes = std::fs::read(dir.join("device.postcard")).unwrap();
            let settings = crate::settings::runtime::from_postcard(&bytes).unwrap();
            assert_eq!(settings.address, 0x21);
            std::fs::remove_dir_all(&dir).unwrap();
        }
    }
}

/// Tools intended for use at runtime
pub mod runtime {
    use super::ProtocolSettings;

    #[derive(Debug, PartialEq)]
    pub enum Error {
        Postcard(postcard::Error),
        Settings(super::SettingsError),
    }

    pub fn from_postcard(s: &[u8]) -> Result<ProtocolSettings, Error> {
        let settings: ProtocolSettings = postcard::from_bytes(s).map_err(Error::Postcard)?;
        settings.validate().map_err(Error::Settings)?;
        Ok(settings)
    }
}

/// Load the settings rendered by [`buildtime::render_file`] in a build.rs.
#[macro_export]
macro_rules! include_settings {
    () => {{
        const PROTOCOL_I2C_SETTINGS: &[u8] = include_bytes!(env!("PROTOCOL_I2C_SETTINGS"));
        $crate::settings::runtime::from_postcard(PROTOCOL_I2C_SETTINGS)
    }};
}
