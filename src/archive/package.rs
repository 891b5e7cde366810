//! Archive extraction, signature packaging, and main-assembly resolution, grounded in the
//! teacher's temp-directory lifecycle style in `ops.rs` (create-under-app-dir, clean up on
//! completion) and extended with a UUID-named extraction directory per the design decision
//! recorded in DESIGN.md.

use std::path::{Path, PathBuf};

use crate::error::{ActError, Result};

/// Allocate a fresh, uniquely named extraction directory under the system temp dir.
pub fn new_temp_extract_dir() -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("act-extract-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).map_err(|e| ActError::Io(e.to_string()))?;
    Ok(dir)
}

/// Extract every entry of `archive_path` into `dest_dir`, preserving each entry's last
/// modified time on the extracted file.
pub fn extract_preserving_timestamps(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = std::fs::File::open(archive_path).map_err(|e| ActError::Io(e.to_string()))?;
    let mut zip =
        zip::ZipArchive::new(file).map_err(|e| ActError::ArchiveExtractFailed(e.to_string()))?;

    for i in 0..zip.len() {
        let mut entry =
            zip.by_index(i).map_err(|e| ActError::ArchiveExtractFailed(e.to_string()))?;
        let Some(rel) = entry.enclosed_name() else { continue };
        let out_path = dest_dir.join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| ActError::Io(e.to_string()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ActError::Io(e.to_string()))?;
        }
        let mut out = std::fs::File::create(&out_path).map_err(|e| ActError::Io(e.to_string()))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| ActError::Io(e.to_string()))?;

        if let Some(mtime) = entry.last_modified().and_then(|dt| to_filetime(dt).ok()) {
            let _ = filetime_set(&out_path, mtime);
        }
    }
    Ok(())
}

fn to_filetime(dt: zip::DateTime) -> Result<i64> {
    use chrono::TimeZone;
    let naive = chrono::NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)
        .and_then(|d| d.and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32))
        .ok_or_else(|| ActError::ArchiveExtractFailed("invalid zip timestamp".to_string()))?;
    Ok(chrono::Utc.from_utc_datetime(&naive).timestamp())
}

fn filetime_set(path: &Path, unix_secs: i64) -> std::io::Result<()> {
    let systime = std::time::UNIX_EPOCH + std::time::Duration::from_secs(unix_secs.max(0) as u64);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(systime)
}

/// Read the first line beginning with `MainAssembly=` (case-insensitive) from `manifest.info`,
/// stripping any `:`-delimited suffix and a trailing `.dll` (case-insensitive). Falls back to
/// `ProgramInfo.config`'s `EntryPoint` element text if no `manifest.info` is present.
pub fn resolve_main_assembly(extracted_dir: &Path) -> Result<Option<String>> {
    let manifest_info = extracted_dir.join("manifest.info");
    if manifest_info.exists() {
        let text = std::fs::read_to_string(&manifest_info).map_err(|e| ActError::Io(e.to_string()))?;
        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = strip_prefix_ci(line, "MainAssembly=") {
                return Ok(Some(clean_assembly_name(rest)));
            }
        }
        return Ok(None);
    }

    let program_info = extracted_dir.join("ProgramInfo.config");
    if program_info.exists() {
        let text = std::fs::read_to_string(&program_info).map_err(|e| ActError::Io(e.to_string()))?;
        return Ok(extract_entry_point(&text));
    }

    Ok(None)
}

/// Same resolution as `resolve_main_assembly`, but reads `manifest.info`/`ProgramInfo.config`
/// directly out of `archive_path` without extracting it — used by the full-package upload
/// path, which never extracts the whole archive to disk.
pub fn resolve_main_assembly_from_archive(archive_path: &Path) -> Result<Option<String>> {
    let file = std::fs::File::open(archive_path).map_err(|e| ActError::Io(e.to_string()))?;
    let mut zip =
        zip::ZipArchive::new(file).map_err(|e| ActError::ArchiveExtractFailed(e.to_string()))?;

    if let Some(text) = read_zip_entry_by_name(&mut zip, "manifest.info")? {
        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = strip_prefix_ci(line, "MainAssembly=") {
                return Ok(Some(clean_assembly_name(rest)));
            }
        }
        return Ok(None);
    }

    if let Some(text) = read_zip_entry_by_name(&mut zip, "ProgramInfo.config")? {
        return Ok(extract_entry_point(&text));
    }

    Ok(None)
}

fn read_zip_entry_by_name(zip: &mut zip::ZipArchive<std::fs::File>, name: &str) -> Result<Option<String>> {
    for i in 0..zip.len() {
        let mut entry =
            zip.by_index(i).map_err(|e| ActError::ArchiveExtractFailed(e.to_string()))?;
        let matches = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|f| f.to_string_lossy().eq_ignore_ascii_case(name)))
            .unwrap_or(false);
        if matches {
            let mut text = String::new();
            use std::io::Read as _;
            entry.read_to_string(&mut text).map_err(|e| ActError::Io(e.to_string()))?;
            return Ok(Some(text));
        }
    }
    Ok(None)
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn clean_assembly_name(value: &str) -> String {
    let value = value.split(':').next().unwrap_or(value);
    let value = value.trim();
    if let Some(stripped) = value.strip_suffix(".dll").or_else(|| value.strip_suffix(".DLL")) {
        stripped.to_string()
    } else {
        value.to_string()
    }
}

fn extract_entry_point(xml: &str) -> Option<String> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    // quick_xml::Reader::config_mut() exposes a ReaderConfig whose `trim_text` setter
    // is the builder-style form used across quick-xml 0.3x releases.
    let mut in_entry_point = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"EntryPoint" => in_entry_point = true,
            Ok(Event::Text(t)) if in_entry_point => {
                return t.unescape().ok().map(|s| s.trim().to_string());
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"EntryPoint" => in_entry_point = false,
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
    }
}

/// For a `.lpz` at `path`, if a sibling `.sig` exists, package it as `<temp_dir>/<basename>.zig`
/// — a zip containing just the `.sig` file as a single entry.
pub fn package_zig(lpz_path: &Path, temp_dir: &Path) -> Result<Option<PathBuf>> {
    let sig_path = lpz_path.with_extension("sig");
    if !sig_path.exists() {
        return Ok(None);
    }
    let basename = lpz_path.file_stem().and_then(|s| s.to_str()).unwrap_or("program");
    let zig_path = temp_dir.join(format!("{}.zig", basename));

    let sig_bytes = std::fs::read(&sig_path).map_err(|e| ActError::Io(e.to_string()))?;
    let dst = std::fs::File::create(&zig_path).map_err(|e| ActError::Io(e.to_string()))?;
    let mut writer = zip::ZipWriter::new(dst);
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let entry_name = sig_path.file_name().and_then(|s| s.to_str()).unwrap_or("signature.sig");
    writer
        .start_file(entry_name, options)
        .map_err(|e| ActError::ManifestEmbedFailed(e.to_string()))?;
    use std::io::Write as _;
    writer.write_all(&sig_bytes).map_err(|e| ActError::Io(e.to_string()))?;
    writer.finish().map_err(|e| ActError::ManifestEmbedFailed(e.to_string()))?;
    Ok(Some(zig_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_assembly_name_strips_variant_and_dll() {
        assert_eq!(clean_assembly_name("MyProgram:release.dll"), "MyProgram");
        assert_eq!(clean_assembly_name("MyProgram.DLL"), "MyProgram");
        assert_eq!(clean_assembly_name("MyProgram"), "MyProgram");
    }

    #[test]
    fn extract_entry_point_reads_text_content() {
        let xml = r#"<ProgramInfo><EntryPoint>MyApp</EntryPoint></ProgramInfo>"#;
        assert_eq!(extract_entry_point(xml), Some("MyApp".to_string()));
    }

    #[test]
    fn extract_entry_point_missing_returns_none() {
        let xml = r#"<ProgramInfo><Other>x</Other></ProgramInfo>"#;
        assert_eq!(extract_entry_point(xml), None);
    }
}
