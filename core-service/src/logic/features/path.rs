//! Path Features - structural features of a single file path
//!
//! Pure function of the (already lower-cased) path. No I/O, no state.
//! Every predicate is an exact-match rule set, checked independently.

use serde::{Deserialize, Serialize};

/// OS-reserved or rarely browsed directories attackers stage tools in
pub const STAGING_DIRECTORIES: &[&str] = &[
    "\\$recycle.bin",
    "\\programdata",
    "\\windows\\debug",
    "\\recycler",
    "\\system volume information",
    "\\intel",
    "\\hp",
    "\\dell",
    "\\recovery",
    "\\perflogs",
    "\\drivers",
];

/// Built-in administration binaries typically run right after a foothold
pub const RECON_COMMANDS: &[&str] = &[
    "net",
    "ping",
    "tasklist",
    "ipconfig",
    "quser",
    "query",
    "netstat",
    "whoami",
    "qwinsta",
    "dsquery",
    "arp",
    "hostname",
    "systeminfo",
    "nltest",
    "cscript",
    "at",
    "ftp",
    "powershell",
    "wmic",
    "nslookup",
    "tracert",
    "route",
];

/// Root substrings left behind by self-extracting archives
pub const EXECUTABLE_ARCHIVE_MARKERS: &[&str] = &["7zs", "rarsfx"];

const SYSTEM32: &str = "\\system32";
const TEMP: &str = "\\temp";
const USERS: &str = "\\users";
const SYSVOL: &str = "sysvol";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathFeatures {
    #[serde(rename = "file_unc")]
    pub unc: String,
    #[serde(rename = "file_drive")]
    pub drive: String,
    #[serde(rename = "file_root")]
    pub root: String,
    #[serde(rename = "file_shortname")]
    pub shortname: String,
    #[serde(rename = "file_ext")]
    pub extension: String,
    #[serde(rename = "file_name")]
    pub filename: String,
    #[serde(rename = "f_shortname_ends_3264")]
    pub shortname_ends_3264: bool,
    #[serde(rename = "f_path_depth")]
    pub path_depth: u32,
    #[serde(rename = "f_root_length")]
    pub root_length: u32,
    #[serde(rename = "f_shortname_length")]
    pub shortname_length: u32,
    #[serde(rename = "f_staging_directory")]
    pub staging_directory: bool,
    #[serde(rename = "f_temp_dir")]
    pub temp_dir: bool,
    #[serde(rename = "f_system32_dir")]
    pub system32_dir: bool,
    #[serde(rename = "f_recon_cmd")]
    pub recon_cmd: bool,
    #[serde(rename = "f_users_dir")]
    pub users_dir: bool,
    #[serde(rename = "f_number_digits")]
    pub number_digits: u32,
    #[serde(rename = "f_executable_archive")]
    pub executable_archive: bool,
}

impl PathFeatures {
    pub fn is_unc(&self) -> bool {
        !self.unc.is_empty()
    }
}

/// Split a Windows path and derive every structural feature
pub fn extract_path_features(full_path: &str) -> PathFeatures {
    let (unc, rest) = split_unc(full_path);
    let (mut drive, rest) = if unc.is_empty() {
        split_drive(full_path)
    } else {
        ("", rest)
    };

    let (root, filename) = split_root(rest);
    let (shortname, extension) = split_extension(filename);

    // \sysvol\windows style exports carry no drive; treat sysvol as one
    let mut root = root.to_string();
    if drive.is_empty() && root.starts_with(SYSVOL) {
        drive = "sysvol:";
        root = root.replacen(SYSVOL, "", 1);
    }

    PathFeatures {
        unc: unc.to_string(),
        drive: drive.to_string(),
        shortname_ends_3264: shortname_ends_3264(shortname),
        path_depth: path_depth(&root),
        root_length: root.chars().count() as u32,
        shortname_length: shortname.chars().count() as u32,
        staging_directory: staging_directory(&root),
        temp_dir: temp_dir(&root),
        system32_dir: system32_dir(&root),
        recon_cmd: recon_cmd(&root, shortname, extension),
        users_dir: users_dir(&root),
        number_digits: number_digits(&root) + number_digits(shortname),
        executable_archive: executable_archive(&root),
        shortname: shortname.to_string(),
        extension: extension.to_string(),
        filename: filename.to_string(),
        root,
    }
}

fn is_sep(c: char) -> bool {
    c == '\\' || c == '/'
}

/// `\\server\share\rest` → (`\\server\share`, `\rest`)
fn split_unc(path: &str) -> (&str, &str) {
    if path.get(1..2) == Some(":") {
        return ("", path);
    }
    let bytes = path.as_bytes();
    if bytes.len() < 2 || !is_sep(bytes[0] as char) || !is_sep(bytes[1] as char) {
        return ("", path);
    }

    let server_end = match path[2..].find(is_sep) {
        Some(i) => i + 2,
        None => return ("", path),
    };
    if server_end <= 2 {
        return ("", path);
    }
    let share_end = match path[server_end + 1..].find(is_sep) {
        Some(0) => return ("", path),
        Some(i) => i + server_end + 1,
        None => path.len(),
    };
    (&path[..share_end], &path[share_end..])
}

/// `c:\rest` → (`c:`, `\rest`)
fn split_drive(path: &str) -> (&str, &str) {
    if path.get(1..2) == Some(":") {
        (&path[..2], &path[2..])
    } else {
        ("", path)
    }
}

/// Directory part (trailing separators trimmed unless it is all separators) and filename
fn split_root(path: &str) -> (&str, &str) {
    let cut = path.rfind(is_sep).map(|i| i + 1).unwrap_or(0);
    let (head, tail) = path.split_at(cut);
    let trimmed = head.trim_end_matches(is_sep);
    if trimmed.is_empty() {
        (head, tail)
    } else {
        (trimmed, tail)
    }
}

/// `wce32.exe` → (`wce32`, `exe`); leading dots never start an extension
fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(dot) if filename[..dot].chars().any(|c| c != '.') => {
            (&filename[..dot], &filename[dot + 1..])
        }
        _ => (filename, ""),
    }
}

/// Tool authors label builds by architecture (wce32, mimikatz64)
pub fn shortname_ends_3264(shortname: &str) -> bool {
    ["32", "64", "86"].iter().any(|s| shortname.ends_with(s))
}

pub fn path_depth(root: &str) -> u32 {
    if root == "\\" {
        0
    } else {
        root.matches('\\').count() as u32
    }
}

pub fn staging_directory(root: &str) -> bool {
    STAGING_DIRECTORIES.iter().any(|dir| {
        root == *dir || (root.starts_with(dir) && root[dir.len()..].starts_with('\\'))
    })
}

pub fn temp_dir(root: &str) -> bool {
    root.ends_with(TEMP) || root.contains("\\temp\\")
}

pub fn system32_dir(root: &str) -> bool {
    root.ends_with(SYSTEM32) || root.contains("\\system32\\")
}

pub fn recon_cmd(root: &str, shortname: &str, extension: &str) -> bool {
    root.contains(SYSTEM32) && extension == "exe" && RECON_COMMANDS.contains(&shortname)
}

pub fn users_dir(root: &str) -> bool {
    root.starts_with(USERS)
}

pub fn number_digits(text: &str) -> u32 {
    text.chars().filter(|c| c.is_ascii_digit()).count() as u32
}

pub fn executable_archive(root: &str) -> bool {
    EXECUTABLE_ARCHIVE_MARKERS.iter().any(|m| root.contains(m))
}
