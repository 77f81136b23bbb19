use std::path::PathBuf;

/// Location of a schema file under `<manifest>/migration/postgresql/`.
pub fn get_path(dir: &str, file: &str) -> PathBuf {
    let mut buf = PathBuf::new();

    for chunk in [dir, "migration", "postgresql", file] {
        buf.push(chunk);
    }

    buf
}
