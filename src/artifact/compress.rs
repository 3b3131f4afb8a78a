//! Local file preparation before upload

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

/// Suffix marking an already compressed file
pub const GZ_SUFFIX: &str = ".gz";

pub fn is_compressed(path: &Path) -> bool {
    path.to_string_lossy().ends_with(GZ_SUFFIX)
}

/// Sibling path with the gzip suffix appended (`rootfs.ext4` -> `rootfs.ext4.gz`)
pub fn gz_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(GZ_SUFFIX);
    PathBuf::from(name)
}

/// Gzip `path` into its sibling, replacing any previous sibling
pub fn gzip_to_sibling(path: &Path) -> io::Result<PathBuf> {
    let target = gz_sibling(path);
    let mut input = BufReader::new(File::open(path)?);
    let output = BufWriter::new(File::create(&target)?);

    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;

    tracing::debug!(source = %path.display(), target = %target.display(), "compressed");
    Ok(target)
}

/// SHA-256 of a file, hex encoded
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
