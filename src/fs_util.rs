use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use zip::ZipArchive;

use crate::error::ForcingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Zip,
    Gzip,
    NetCdf,
    Grib,
    Unknown,
}

pub fn sniff(path: &Path) -> Result<PayloadKind, ForcingError> {
    let mut file = fs::File::open(path)
        .map_err(|err| ForcingError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut magic = [0u8; 8];
    let read = file
        .read(&mut magic)
        .map_err(|err| ForcingError::Filesystem(err.to_string()))?;
    Ok(classify(&magic[..read]))
}

fn classify(magic: &[u8]) -> PayloadKind {
    match magic {
        [b'P', b'K', 3, 4, ..] => PayloadKind::Zip,
        [0x1f, 0x8b, ..] => PayloadKind::Gzip,
        [b'C', b'D', b'F', 1 | 2 | 5, ..] => PayloadKind::NetCdf,
        [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'] => PayloadKind::NetCdf,
        [b'G', b'R', b'I', b'B', ..] => PayloadKind::Grib,
        _ => PayloadKind::Unknown,
    }
}

pub fn unpack_payload(path: &Path, work_dir: &Path) -> Result<Vec<PathBuf>, ForcingError> {
    match sniff(path)? {
        PayloadKind::NetCdf => Ok(vec![path.to_path_buf()]),
        PayloadKind::Zip => {
            let target = work_dir.join(format!("{}.d", file_stem(path)));
            let mut files: Vec<PathBuf> = extract_zip(path, &target)?
                .into_iter()
                .filter(|file| matches!(sniff(file), Ok(PayloadKind::NetCdf)))
                .collect();
            files.sort();
            if files.is_empty() {
                return Err(ForcingError::MalformedResponse(format!(
                    "zip payload {} holds no NetCDF file",
                    path.display()
                )));
            }
            Ok(files)
        }
        PayloadKind::Gzip => {
            let target = work_dir.join(format!("{}.nc", file_stem(path)));
            gunzip(path, &target)?;
            match sniff(&target)? {
                PayloadKind::NetCdf => Ok(vec![target]),
                other => Err(ForcingError::MalformedResponse(format!(
                    "gzip payload {} holds {other:?}, not NetCDF",
                    path.display()
                ))),
            }
        }
        other => Err(ForcingError::MalformedResponse(format!(
            "unexpected payload {} ({other:?})",
            path.display()
        ))),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("payload")
        .to_string()
}

pub fn gunzip(source: &Path, destination: &Path) -> Result<(), ForcingError> {
    let file = fs::File::open(source)
        .map_err(|err| ForcingError::Filesystem(format!("open {}: {err}", source.display())))?;
    let mut decoder = GzDecoder::new(file);
    let mut out =
        fs::File::create(destination).map_err(|err| ForcingError::Filesystem(err.to_string()))?;
    io::copy(&mut decoder, &mut out)
        .map_err(|err| ForcingError::MalformedResponse(format!("gzip: {err}")))?;
    Ok(())
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, ForcingError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        ForcingError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| ForcingError::MalformedResponse(err.to_string()))?;

    let mut written = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| ForcingError::MalformedResponse(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(ForcingError::MalformedResponse(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| ForcingError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| ForcingError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| ForcingError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| ForcingError::MalformedResponse(err.to_string()))?;
        written.push(entry_path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    #[test]
    fn magic_bytes() {
        assert_eq!(classify(b"CDF\x01rest"), PayloadKind::NetCdf);
        assert_eq!(classify(b"\x89HDF\r\n\x1a\n"), PayloadKind::NetCdf);
        assert_eq!(classify(b"PK\x03\x04"), PayloadKind::Zip);
        assert_eq!(classify(b"GRIB"), PayloadKind::Grib);
        assert_eq!(classify(b"<html>"), PayloadKind::Unknown);
        assert_eq!(classify(b""), PayloadKind::Unknown);
    }

    #[test]
    fn gzip_payload_is_unpacked() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("SURF.download");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"CDF\x01fake-netcdf-body").unwrap();
        fs::write(&payload, encoder.finish().unwrap()).unwrap();

        let files = unpack_payload(&payload, dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("SURF.nc")]);
        assert_eq!(fs::read(&files[0]).unwrap(), b"CDF\x01fake-netcdf-body");
    }

    #[test]
    fn html_error_page_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("PLEV.download");
        fs::write(&payload, b"<html>quota exceeded</html>").unwrap();
        let err = unpack_payload(&payload, dir.path()).unwrap_err();
        assert!(err.is_transient());
    }
}
