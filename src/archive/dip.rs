//! `.dip` INI parser: builds an ordered `IpTable` from the `[IPTable]` section, grouping
//! `(id|addr|device|port|room)<index>` keys by their trailing numeric index. Tolerant of
//! missing optional keys; invalid entries (missing `ipId` or `address`) are skipped with a
//! warning rather than aborting the whole parse.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpTableEntry {
    pub ip_id: u8,
    pub address: String,
    pub device_id: Option<u8>,
    pub port: Option<u16>,
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpTable {
    pub entries: Vec<IpTableEntry>,
}

#[derive(Default)]
struct RawEntry {
    id: Option<String>,
    addr: Option<String>,
    device: Option<String>,
    port: Option<String>,
    room: Option<String>,
}

/// Parse the `[IPTable]` section of a `.dip` file's text.
pub fn parse(text: &str) -> IpTable {
    let mut in_section = false;
    let mut raw: BTreeMap<u32, RawEntry> = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            in_section = line.eq_ignore_ascii_case("[IPTable]");
            continue;
        }
        if !in_section {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else { continue };
        let key = key.trim().to_lowercase();
        let value = value.trim().to_string();

        let (field, idx_str) = split_field_index(&key);
        let Ok(idx) = idx_str.parse::<u32>() else { continue };
        let entry = raw.entry(idx).or_default();
        match field.as_str() {
            "id" => entry.id = Some(value),
            "addr" | "address" => entry.addr = Some(value),
            "device" | "deviceid" => entry.device = Some(value),
            "port" => entry.port = Some(value),
            "room" | "roomid" => entry.room = Some(value),
            _ => {}
        }
    }

    let mut entries = Vec::new();
    for (idx, raw_entry) in raw {
        let Some(id_str) = raw_entry.id else {
            eprintln!("skipping .dip entry {}: missing ipId", idx);
            continue;
        };
        let Some(address) = raw_entry.addr else {
            eprintln!("skipping .dip entry {}: missing address", idx);
            continue;
        };
        let Ok(ip_id) = parse_numeric_u8(&id_str) else {
            eprintln!("skipping .dip entry {}: ipId {:?} is not numeric", idx, id_str);
            continue;
        };
        if !(0x03..=0xFE).contains(&ip_id) {
            eprintln!("skipping .dip entry {}: ipId {:#04x} out of range", idx, ip_id);
            continue;
        }
        if address.trim().is_empty() {
            eprintln!("skipping .dip entry {}: blank address", idx);
            continue;
        }
        let device_id = raw_entry.device.as_deref().and_then(|s| parse_numeric_u8(s).ok());
        let port = raw_entry.port.as_deref().and_then(|s| s.parse::<u16>().ok());
        let room_id = raw_entry.room.filter(|s| !s.trim().is_empty());

        entries.push(IpTableEntry { ip_id, address, device_id, port, room_id });
    }

    IpTable { entries }
}

fn split_field_index(key: &str) -> (String, String) {
    let idx_start = key.find(|c: char| c.is_ascii_digit()).unwrap_or(key.len());
    (key[..idx_start].to_string(), key[idx_start..].to_string())
}

fn parse_numeric_u8(s: &str) -> Result<u8, std::num::ParseIntError> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        s.parse::<u8>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_entries() {
        let text = "[IPTable]\nid1=0x03\naddr1=192.168.1.10\nport1=41795\nid2=5\naddr2=device.local\n";
        let table = parse(text);
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.entries[0].ip_id, 0x03);
        assert_eq!(table.entries[0].address, "192.168.1.10");
        assert_eq!(table.entries[0].port, Some(41795));
        assert_eq!(table.entries[1].ip_id, 5);
    }

    #[test]
    fn drops_entries_missing_required_fields() {
        let text = "[IPTable]\naddr1=192.168.1.10\nid2=7\n";
        let table = parse(text);
        assert!(table.entries.is_empty());
    }

    #[test]
    fn ignores_sections_other_than_iptable() {
        let text = "[Other]\nid1=5\naddr1=host\n[IPTable]\nid1=5\naddr1=host\n";
        let table = parse(text);
        assert_eq!(table.entries.len(), 1);
    }
}
