//! Parsers for the text output of the `btrfs` tool

use chrono::NaiveDateTime;
use uuid::Uuid;

/// Subvolume details from `btrfs subvolume show`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubvolumeShow {
    /// Path relative to the top-level tree, empty for the top level itself
    pub relative_path: String,
    pub uuid: Uuid,
}

/// One line of `btrfs subvolume list -s -r -q -u`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedSubvolume {
    pub otime: NaiveDateTime,
    pub parent_uuid: Option<Uuid>,
    pub uuid: Uuid,
    pub path: String,
}

const OTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse `btrfs subvolume show <path>`
///
/// ```text
/// snapshots/home
///     Name:           home
///     UUID:           8a3c6f0e-...
///     Parent UUID:    -
/// ```
pub fn subvolume_show(output: &str) -> Result<SubvolumeShow, String> {
    let mut lines = output.lines();
    let first = lines
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .ok_or("empty output")?;

    let relative_path = match first {
        "/" | "<FS_TREE>" => String::new(),
        path => path.trim_start_matches("<FS_TREE>/").trim_matches('/').to_string(),
    };

    let uuid = lines
        .filter_map(|line| line.trim().strip_prefix("UUID:"))
        .map(str::trim)
        .next()
        .ok_or("no UUID line")?;

    Ok(SubvolumeShow {
        relative_path,
        uuid: parse_uuid(uuid)?,
    })
}

/// Parse the filesystem UUID out of `btrfs filesystem show <path>`
///
/// ```text
/// Label: 'data'  uuid: 6d4f3c1e-...
///     Total devices 1 FS bytes used 1.00GiB
/// ```
pub fn filesystem_uuid(output: &str) -> Result<Uuid, String> {
    let value = output
        .lines()
        .find_map(|line| line.split_once("uuid:").map(|(_, rest)| rest))
        .and_then(|rest| rest.split_whitespace().next())
        .ok_or("no filesystem uuid")?;
    parse_uuid(value)
}

/// Parse `btrfs subvolume list -s -r -q -u <path>`
///
/// ```text
/// ID 259 gen 12 cgen 12 top level 5 otime 2024-01-03 14:30:00 parent_uuid 8a3c... uuid 1b2c... path snapshots/home.0
/// ```
pub fn subvolume_list(output: &str) -> Result<Vec<ListedSubvolume>, String> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(subvolume_list_line)
        .collect()
}

fn subvolume_list_line(line: &str) -> Result<ListedSubvolume, String> {
    // Fields always come before the path, so the first " path " is the separator
    let (fields, path) = line
        .split_once(" path ")
        .ok_or_else(|| format!("no path in {:?}", line))?;

    let mut otime = None;
    let mut parent_uuid = None;
    let mut uuid = None;

    let mut tokens = fields.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "otime" => {
                let date = tokens.next().unwrap_or_default();
                let time = tokens.next().unwrap_or_default();
                let stamp = format!("{} {}", date, time);
                otime = Some(
                    NaiveDateTime::parse_from_str(&stamp, OTIME_FORMAT)
                        .map_err(|e| format!("bad otime {:?}: {}", stamp, e))?,
                );
            }
            "parent_uuid" => {
                parent_uuid = match tokens.next() {
                    Some("-") | None => None,
                    Some(value) => Some(parse_uuid(value)?),
                };
            }
            "uuid" => {
                uuid = tokens.next().map(parse_uuid).transpose()?;
            }
            _ => {}
        }
    }

    Ok(ListedSubvolume {
        otime: otime.ok_or_else(|| format!("no otime in {:?}", line))?,
        parent_uuid,
        uuid: uuid.ok_or_else(|| format!("no uuid in {:?}", line))?,
        path: path.trim_start_matches("<FS_TREE>/").to_string(),
    })
}

fn parse_uuid(value: &str) -> Result<Uuid, String> {
    Uuid::parse_str(value).map_err(|e| format!("bad uuid {:?}: {}", value, e))
}
