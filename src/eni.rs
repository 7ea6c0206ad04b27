/*!
    Parser for network-information (ENI) files describing the slaves on the bus.

    Two concrete forms are accepted:

    - a text dump with `=== Master <m>, Slave <s> ===` sentinel lines followed by key-value
      lines (`Vendor Id:`, `Product code:`, `Revision number:`, `Serial number:`,
      `Device name:`, `Distributed clocks:`)
    - an XML document containing a `<SlaveList>` of `<Slave>` elements, or rooted at
      `<EtherCATInfo>`, with optional `<RxPdo>`/`<TxPdo>`/`<Pdo>` descriptors carrying
      `<Entry>` children

    ENI files in the wild are produced by many tools and rarely agree on casing, on whether a
    value is an attribute or a child element, or on integer spelling. The parser is therefore
    a tolerant scanner: element and attribute names match case-insensitively, integers accept
    plain decimal and `0x`/`x`/`#x` hexadecimal (after optional quoting), and a malformed
    value skips the offending field rather than failing the file.
*/

use crate::{
    error::{ControllerError, ControllerResult},
    sdo::{PdoEntry, PdoMapping},
    };
use std::path::Path;
use tracing::warn;


/// vendor id assumed when the file does not carry one
pub const DEFAULT_VENDOR_ID: u32 = 0x0001_16c7;
/// product code assumed when the file does not carry one
pub const DEFAULT_PRODUCT_CODE: u32 = 0x003e_0402;

/// one slave discovered in a network-information file
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EniSlave {
    pub position: u16,
    pub vendor_id: u32,
    pub product_code: u32,
    pub revision: u32,
    pub serial: u32,
    pub name: String,
    pub has_dc: bool,
    /// output (controller -> drive) PDO descriptors, empty when the file carries none
    pub rx_pdos: Vec<PdoMapping>,
    /// input (drive -> controller) PDO descriptors, empty when the file carries none
    pub tx_pdos: Vec<PdoMapping>,
}

/// parse a network-information file
pub fn parse_file(path: &Path) -> ControllerResult<Vec<EniSlave>> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content)
}

/// parse network-information content, detecting the concrete form
pub fn parse_str(content: &str) -> ControllerResult<Vec<EniSlave>> {
    let slaves =
        if find_ci(content, "<SlaveList").is_some() {parse_slave_list(content)}
        else if find_ci(content, "<EtherCATInfo").is_some() {parse_ethercat_info(content)}
        else {parse_text(content)};
    if slaves.is_empty() {
        return Err(ControllerError::Config("no slaves found in network information".into()));
    }
    Ok(slaves)
}


/// case-insensitive substring search
fn find_ci(hay: &str, needle: &str) -> Option<usize> {
    let hay = hay.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || hay.len() < needle.len() {return None}
    (0 ..= hay.len() - needle.len())
        .find(|&i| hay[i .. i + needle.len()].eq_ignore_ascii_case(needle))
}

/// find an opening tag prefix, skipping longer tag names it is a prefix of
/// (`<Slave` must not match `<SlaveList`)
fn find_tag(region: &str, tag: &str, from: usize) -> Option<usize> {
    let mut cursor = from;
    while cursor <= region.len() {
        let at = cursor + find_ci(&region[cursor ..], tag)?;
        match region.as_bytes().get(at + tag.len()) {
            Some(next) if next.is_ascii_alphanumeric() => cursor = at + 1,
            _ => return Some(at),
        }
    }
    None
}

/// lenient integer parsing: decimal, `0x…`, `x…`, `#x…`, optionally quoted
fn parse_int(text: &str) -> Option<i64> {
    let text = text.trim().trim_matches('"').trim();
    let text = text.strip_prefix('#').unwrap_or(text);
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    }
    else if let Some(hex) = text.strip_prefix('x').or_else(|| text.strip_prefix('X')) {
        i64::from_str_radix(hex, 16).ok()
    }
    else {
        text.parse().ok()
    }
}

/// text enclosed in `<tag> … </tag>`, case-insensitive
fn element_text<'a>(region: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = find_ci(region, &open)? + open.len();
    let end = start + find_ci(&region[start ..], &close)?;
    Some(region[start .. end].trim())
}

/// value of `key="…"` or `key=…` inside an opening tag, case-insensitive
fn attr_text<'a>(tag: &'a str, key: &str) -> Option<&'a str> {
    let mut from = 0;
    while let Some(at) = find_ci(&tag[from ..], key).map(|i| from + i) {
        // the key must stand alone: `Index` is not the `Index` of `SubIndex`
        let boundary = at == 0
            || matches!(tag.as_bytes()[at - 1], b' ' | b'\t' | b'\n' | b'\r' | b'"' | b'<');
        if boundary {
            if let Some(value) = tag[at + key.len() ..].trim_start().strip_prefix('=') {
                let value = value.trim_start_matches([' ', '"']);
                let stop = value.find([' ', '>', '"', '/']).unwrap_or(value.len());
                return Some(&value[.. stop]);
            }
        }
        from = at + 1;
        if from >= tag.len() {break}
    }
    None
}

/// integer found either as a child element of `region` or as an attribute of `tag`
fn int_field(region: &str, tag: &str, name: &str) -> Option<i64> {
    element_text(region, name).and_then(parse_int)
        .or_else(|| attr_text(tag, name).and_then(parse_int))
}

/// rest of the line following `key`, trimmed
fn key_line<'a>(section: &'a str, key: &str) -> Option<&'a str> {
    let at = find_ci(section, key)?;
    let rest = &section[at + key.len() ..];
    let end = rest.find(['\n', '\r']).unwrap_or(rest.len());
    Some(rest[.. end].trim())
}

/// fill identity defaults, warning when the file did not carry them
fn apply_identity_defaults(slave: &mut EniSlave) {
    if slave.vendor_id == 0 {
        warn!(position = slave.position, vendor_id = DEFAULT_VENDOR_ID,
            "slave without vendor id, assuming default");
        slave.vendor_id = DEFAULT_VENDOR_ID;
    }
    if slave.product_code == 0 {
        warn!(position = slave.position, product_code = DEFAULT_PRODUCT_CODE,
            "slave without product code, assuming default");
        slave.product_code = DEFAULT_PRODUCT_CODE;
    }
}


/// parse the text dump form
fn parse_text(content: &str) -> Vec<EniSlave> {
    let mut slaves = Vec::new();
    let mut cursor = 0;
    while let Some(at) = find_ci(&content[cursor ..], "=== Master") {
        let start = cursor + at;
        let section_end = find_ci(&content[start + 1 ..], "=== Master")
            .map(|next| start + 1 + next)
            .unwrap_or(content.len());
        let section = &content[start .. section_end];

        let mut slave = EniSlave::default();
        slave.position = slaves.len() as u16;
        // sentinel carries the bus position: `=== Master 0, Slave 2 ===`
        if let Some(at) = find_ci(section, "Slave ") {
            let rest = &section[at + 6 ..];
            if let Some(end) = find_ci(rest, " ===") {
                if let Some(position) = parse_int(&rest[.. end]) {
                    slave.position = position as u16;
                }
            }
        }
        if let Some(value) = key_line(section, "Vendor Id:").and_then(parse_int) {
            slave.vendor_id = value as u32;
        }
        if let Some(value) = key_line(section, "Product code:").and_then(parse_int) {
            slave.product_code = value as u32;
        }
        if let Some(value) = key_line(section, "Revision number:").and_then(parse_int) {
            slave.revision = value as u32;
        }
        if let Some(value) = key_line(section, "Serial number:").and_then(parse_int) {
            slave.serial = value as u32;
        }
        if let Some(name) = key_line(section, "Device name:") {
            slave.name = name.into();
        }
        slave.has_dc = key_line(section, "Distributed clocks:")
            .map(|value| value.eq_ignore_ascii_case("yes"))
            .unwrap_or(false);

        apply_identity_defaults(&mut slave);
        slaves.push(slave);
        cursor = start + 1;
    }
    slaves
}


/// parse the `<SlaveList>` XML form
fn parse_slave_list(content: &str) -> Vec<EniSlave> {
    let mut slaves = Vec::new();
    let list_start = match find_ci(content, "<SlaveList") {Some(i) => i, None => return slaves};
    let list_end = find_ci(&content[list_start ..], "</SlaveList>")
        .map(|end| list_start + end)
        .unwrap_or(content.len());
    let list = &content[list_start .. list_end];

    let mut cursor = 0;
    while let Some(start) = find_tag(list, "<Slave", cursor) {
        let tag_end = match list[start ..].find('>') {
            Some(end) => start + end + 1,
            None => break,
        };
        let section_end = find_ci(&list[tag_end ..], "</Slave>")
            .map(|end| tag_end + end)
            .unwrap_or(tag_end);
        let tag = &list[start .. tag_end];
        let section = &list[tag_end .. section_end];

        let mut slave = EniSlave::default();
        slave.position = slaves.len() as u16;
        if let Some(position) = int_field(section, tag, "Position") {
            slave.position = position as u16;
        }
        if let Some(vendor) = int_field(section, tag, "VendorId")
                .or_else(|| int_field(section, tag, "VendorID")) {
            slave.vendor_id = vendor as u32;
        }
        if let Some(product) = int_field(section, tag, "ProductCode") {
            slave.product_code = product as u32;
        }
        if let Some(revision) = int_field(section, tag, "RevisionNo") {
            slave.revision = revision as u32;
        }
        if let Some(serial) = int_field(section, tag, "SerialNo") {
            slave.serial = serial as u32;
        }
        if let Some(name) = element_text(section, "Name").or_else(|| attr_text(tag, "Name")) {
            slave.name = name.into();
        }
        slave.has_dc = find_ci(section, "<Dc").is_some();
        (slave.rx_pdos, slave.tx_pdos) = scan_pdos(section);

        apply_identity_defaults(&mut slave);
        slaves.push(slave);
        cursor = section_end.max(tag_end) + 1;
        if cursor >= list.len() {break}
    }
    slaves
}

/// parse the `<EtherCATInfo>` XML form, one block per slave
fn parse_ethercat_info(content: &str) -> Vec<EniSlave> {
    let mut slaves = Vec::new();
    let mut cursor = 0;
    while let Some(at) = find_ci(&content[cursor ..], "<EtherCATInfo") {
        let start = cursor + at;
        let section_end = find_ci(&content[start ..], "</EtherCATInfo>")
            .map(|end| start + end)
            .unwrap_or(content.len());
        let section = &content[start .. section_end];

        let mut slave = EniSlave::default();
        slave.position = slaves.len() as u16;
        if let Some(vendor) = element_text(section, "Id").and_then(parse_int) {
            slave.vendor_id = vendor as u32;
        }
        if let Some(product) = int_field(section, section, "ProductCode") {
            slave.product_code = product as u32;
        }
        if let Some(name) = element_text(section, "Name") {
            slave.name = name.into();
        }
        slave.has_dc = find_ci(section, "<Dc").is_some();
        (slave.rx_pdos, slave.tx_pdos) = scan_pdos(section);

        apply_identity_defaults(&mut slave);
        slaves.push(slave);
        cursor = section_end + 1;
        if cursor >= content.len() {break}
    }
    slaves
}


/// scan a slave region for `<RxPdo>`, `<TxPdo>` and generic `<Pdo>` descriptors
fn scan_pdos(section: &str) -> (Vec<PdoMapping>, Vec<PdoMapping>) {
    let mut rx = Vec::new();
    let mut tx = Vec::new();
    let mut cursor = 0;
    loop {
        let rx_at = find_tag(section, "<RxPdo", cursor);
        let tx_at = find_tag(section, "<TxPdo", cursor);
        let generic_at = find_tag(section, "<Pdo", cursor);
        // earliest opening wins; a generic <Pdo> chooses its direction by index range
        let (block_start, close_tag, kind) = match (rx_at, tx_at, generic_at) {
            (Some(r), t, g) if t.map_or(true, |t| r < t) && g.map_or(true, |g| r < g) =>
                (r, "</RxPdo>", Some(false)),
            (r, Some(t), g) if r.map_or(true, |r| t < r) && g.map_or(true, |g| t < g) =>
                (t, "</TxPdo>", Some(true)),
            (_, _, Some(g)) => (g, "</Pdo>", None),
            _ => break,
        };
        let block_end = match find_ci(&section[block_start ..], close_tag) {
            Some(end) => block_start + end,
            None => break,
        };
        let block = &section[block_start .. block_end];

        // the PDO's own index precedes its entries, do not confuse it with an entry index
        let head = &block[.. find_ci(block, "<Entry").unwrap_or(block.len())];
        let tag_end = block.find('>').map(|i| i + 1).unwrap_or(0);
        let index = element_text(head, "Index").and_then(parse_int)
            .or_else(|| attr_text(&block[.. tag_end], "Index").and_then(parse_int))
            .unwrap_or(0) as u16;
        let entries = scan_entries(block);
        let mapping = PdoMapping::new(index, entries);

        let transmit = kind.unwrap_or(PdoMapping::is_transmit(index));
        if transmit {tx.push(mapping)} else {rx.push(mapping)}

        cursor = block_end + close_tag.len();
        if cursor >= section.len() {break}
    }
    (rx, tx)
}

/// collect the `<Entry>` descriptors of one PDO block
fn scan_entries(block: &str) -> Vec<PdoEntry> {
    let mut entries = Vec::new();
    let mut cursor = 0;
    while let Some(start) = find_tag(block, "<Entry", cursor) {
        let tag_end = match block[start ..].find('>') {
            Some(end) => start + end + 1,
            None => break,
        };
        let entry_end = find_ci(&block[tag_end ..], "</Entry>")
            .map(|end| tag_end + end)
            .unwrap_or(tag_end);
        let tag = &block[start .. tag_end];
        let region = &block[tag_end .. entry_end];

        entries.push(PdoEntry::new(
            int_field(region, tag, "Index").unwrap_or(0) as u16,
            int_field(region, tag, "SubIndex").unwrap_or(0) as u8,
            int_field(region, tag, "BitLen").unwrap_or(0) as u8,
            ));
        cursor = entry_end.max(tag_end) + 1;
        if cursor >= block.len() {break}
    }
    entries
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form() {
        let slaves = parse_str(
            "=== Master 0, Slave 2 ===\n  \
             Vendor Id:    0x00001097\n  \
             Product code:  0x00002406\n  \
             Revision number: 0x00010001\n  \
             Device name: EYOU-2406\n  \
             Distributed clocks: yes\n").unwrap();
        assert_eq!(slaves.len(), 1);
        let slave = &slaves[0];
        assert_eq!(slave.position, 2);
        assert_eq!(slave.vendor_id, 0x1097);
        assert_eq!(slave.product_code, 0x2406);
        assert_eq!(slave.revision, 0x0001_0001);
        assert_eq!(slave.name, "EYOU-2406");
        assert!(slave.has_dc);
    }

    #[test]
    fn text_form_several_slaves_with_defaults() {
        let slaves = parse_str(
            "=== Master 0, Slave 0 ===\n\
             Vendor Id: 0x1097\nProduct code: 0x2406\n\
             === Master 0, Slave 1 ===\n\
             Device name: mystery\n").unwrap();
        assert_eq!(slaves.len(), 2);
        assert_eq!(slaves[1].position, 1);
        // identity falls back to the documented defaults, never to zero
        assert_eq!(slaves[1].vendor_id, DEFAULT_VENDOR_ID);
        assert_eq!(slaves[1].product_code, DEFAULT_PRODUCT_CODE);
    }

    #[test]
    fn slave_list_with_pdos() {
        let slaves = parse_str(r##"
            <SlaveList>
              <slave Position="1" VendorID="#x1097" productcode="x2406">
                <rxpdo>
                  <Index>0x1600</Index>
                  <Entry><Index>0x6040</Index><SubIndex>0</SubIndex><BitLen>16</BitLen></Entry>
                  <Entry><Index>0x607A</Index><SubIndex>0</SubIndex><BitLen>32</BitLen></Entry>
                </rxpdo>
                <TxPdo Index="0x1A00">
                  <Entry Index="0x6041" SubIndex="0" BitLen="16"/>
                  <Entry Index="0x6064" SubIndex="0" BitLen="32"/>
                </TxPdo>
              </slave>
            </SlaveList>"##).unwrap();
        assert_eq!(slaves.len(), 1);
        let slave = &slaves[0];
        assert_eq!(slave.position, 1);
        assert_eq!(slave.vendor_id, 0x1097);
        assert_eq!(slave.product_code, 0x2406);
        assert_eq!(slave.rx_pdos.len(), 1);
        assert_eq!(slave.rx_pdos[0].index, 0x1600);
        assert_eq!(slave.rx_pdos[0].entries, vec![
            PdoEntry::new(0x6040, 0, 16),
            PdoEntry::new(0x607a, 0, 32),
            ]);
        assert_eq!(slave.tx_pdos.len(), 1);
        assert_eq!(slave.tx_pdos[0].entries[1], PdoEntry::new(0x6064, 0, 32));
    }

    #[test]
    fn generic_pdo_direction_by_index_range() {
        let slaves = parse_str(r#"
            <SlaveList>
              <Slave Position="0" VendorId="1" ProductCode="2">
                <Pdo><Index>0x1601</Index></Pdo>
                <Pdo><Index>0x1A01</Index></Pdo>
              </Slave>
            </SlaveList>"#).unwrap();
        assert_eq!(slaves[0].rx_pdos.len(), 1);
        assert_eq!(slaves[0].rx_pdos[0].index, 0x1601);
        assert_eq!(slaves[0].tx_pdos.len(), 1);
        assert_eq!(slaves[0].tx_pdos[0].index, 0x1a01);
    }

    #[test]
    fn malformed_integer_skips_the_field() {
        let slaves = parse_str(
            "=== Master 0, Slave 0 ===\n\
             Vendor Id: zz34\n\
             Product code: 0x2406\n").unwrap();
        assert_eq!(slaves[0].vendor_id, DEFAULT_VENDOR_ID);
        assert_eq!(slaves[0].product_code, 0x2406);
    }

    #[test]
    fn empty_input_is_a_config_error() {
        assert!(matches!(
            parse_str("<SlaveList></SlaveList>"),
            Err(ControllerError::Config(_))));
        assert!(matches!(
            parse_str("nothing here"),
            Err(ControllerError::Config(_))));
    }

    #[test]
    fn integer_spellings() {
        for text in ["4096", "0x1000", "x1000", "#x1000", " \"0x1000\" "] {
            assert_eq!(parse_int(text), Some(4096), "{:?}", text);
        }
        assert_eq!(parse_int("garbage"), None);
    }
}
