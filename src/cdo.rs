use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ForcingError;

pub trait GribConverter: Send + Sync {
    fn to_netcdf(&self, grib: &Path, netcdf: &Path) -> Result<(), ForcingError>;
}

#[derive(Debug, Clone)]
pub struct CdoConverter {
    cdo: Option<PathBuf>,
}

impl CdoConverter {
    pub fn new() -> Self {
        Self {
            cdo: find_in_path("cdo"),
        }
    }

    pub fn is_available(&self) -> bool {
        self.cdo.is_some()
    }

    pub fn version(&self) -> Option<String> {
        let cdo = self.cdo.as_ref()?;
        let output = Command::new(cdo).arg("--version").output().ok()?;
        // cdo prints its banner on stderr
        let text = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        String::from_utf8_lossy(&text)
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
    }

    fn run_cmd(&self, program: &Path, args: &[String]) -> Result<(), ForcingError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| ForcingError::Conversion(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {}", program.display())
        } else {
            stderr
        };
        Err(ForcingError::Conversion(message))
    }
}

impl Default for CdoConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl GribConverter for CdoConverter {
    fn to_netcdf(&self, grib: &Path, netcdf: &Path) -> Result<(), ForcingError> {
        let cdo = self
            .cdo
            .as_ref()
            .ok_or_else(|| ForcingError::MissingTool("cdo".to_string()))?;
        let args = vec![
            "-f".to_string(),
            "nc".to_string(),
            "copy".to_string(),
            grib.to_string_lossy().to_string(),
            netcdf.to_string_lossy().to_string(),
        ];
        self.run_cmd(cdo, &args)
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
