//! In-memory tar archives for bulk transfer in and out of a cell

use sandcell_types::{InputArtifact, OutputArtifacts};
use std::io::{self, Read};
use std::path::{Component, Path};

/// Pack input artifacts into one tar archive of plain files
///
/// Entries are owned by root with mode 0644 so the unprivileged user can read
/// but not replace them.
///
/// # Errors
/// Returns an I/O error if an entry cannot be appended
pub fn pack_inputs(inputs: &[InputArtifact]) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for input in inputs {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(input.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        builder.append_data(&mut header, input.name.as_str(), input.bytes.as_slice())?;
    }
    builder.into_inner()
}

/// Decode a tar archive of an output root into relative names
///
/// The runtime prefixes every entry with the root's last path segment
/// (`output/result.csv`); that prefix is stripped. Only regular files are
/// kept, and entries that would escape the root are dropped.
///
/// # Errors
/// Returns an I/O error if the archive is malformed
pub fn unpack_outputs(archive: &[u8], output_root: &str) -> io::Result<OutputArtifacts> {
    let prefix = Path::new(output_root)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    let mut artifacts = OutputArtifacts::new();
    let mut reader = tar::Archive::new(archive);
    for entry in reader.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.into_owned();
        let Some(name) = relative_name(&path, prefix) else {
            tracing::warn!(path = %path.display(), "dropping output entry outside the output root");
            continue;
        };
        let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry.read_to_end(&mut bytes)?;
        artifacts.insert(name, bytes);
    }
    Ok(artifacts)
}

/// `/`-joined path below `prefix`, or `None` if the entry is not safely inside it
fn relative_name(path: &Path, prefix: &str) -> Option<String> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if !prefix.is_empty() {
        if segments.first() != Some(&prefix) {
            return None;
        }
        segments.remove(0);
    }
    (!segments.is_empty()).then(|| segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder.append_data(&mut dir, "output/", io::empty()).unwrap();
        for (path, bytes) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, path, *bytes).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_pack_produces_plain_entries() {
        let inputs = vec![
            InputArtifact::named("data.csv", b"a,b\n1,2\n".to_vec()).unwrap(),
            InputArtifact::named("empty.txt", Vec::new()).unwrap(),
        ];
        let archive = pack_inputs(&inputs).unwrap();

        let mut reader = tar::Archive::new(archive.as_slice());
        let mut names = Vec::new();
        for entry in reader.entries().unwrap() {
            let mut entry = entry.unwrap();
            let mut body = Vec::new();
            entry.read_to_end(&mut body).unwrap();
            names.push((entry.path().unwrap().display().to_string(), body.len()));
        }
        assert_eq!(names, vec![("data.csv".to_string(), 8), ("empty.txt".to_string(), 0)]);
    }

    #[test]
    fn test_pack_empty_is_valid_archive() {
        let archive = pack_inputs(&[]).unwrap();
        assert!(unpack_outputs(&archive, "/tmp/output").unwrap().is_empty());
    }

    #[test]
    fn test_unpack_strips_root_and_keeps_nesting() {
        let archive = output_archive(&[
            ("output/result.csv", b"total\n3\n"),
            ("output/charts/plot.txt", b"x"),
        ]);
        let artifacts = unpack_outputs(&archive, "/tmp/output").unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts["result.csv"], b"total\n3\n");
        assert_eq!(artifacts["charts/plot.txt"], b"x");
    }

    #[test]
    fn test_unpack_empty_root_has_no_artifacts() {
        let archive = output_archive(&[]);
        assert!(unpack_outputs(&archive, "/tmp/output").unwrap().is_empty());
    }

    #[test]
    fn test_relative_name_rejects_escape() {
        assert_eq!(relative_name(Path::new("output/../etc/passwd"), "output"), None);
        assert_eq!(relative_name(Path::new("other/file"), "output"), None);
        assert_eq!(relative_name(Path::new("output"), "output"), None);
        assert_eq!(relative_name(Path::new("./output/a/b.txt"), "output").as_deref(), Some("a/b.txt"));
    }
}
