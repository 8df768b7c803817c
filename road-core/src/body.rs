//! Small helpers for building and reading the ordered field lists that
//! stand in for the packeting layer's CBOR/JSON body maps.

pub type Field = (&'static str, Vec<u8>);
pub type ParsedFields = Vec<(String, Vec<u8>)>;

pub fn str_field(name: &'static str, value: &str) -> Field {
    (name, value.as_bytes().to_vec())
}

pub fn u32_field(name: &'static str, value: u32) -> Field {
    (name, value.to_be_bytes().to_vec())
}

pub fn bytes_field(name: &'static str, value: &[u8]) -> Field {
    (name, value.to_vec())
}

pub fn get_str(fields: &ParsedFields, name: &str) -> Option<String> {
    fields
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, v)| String::from_utf8(v.clone()).ok())
}

pub fn get_u32(fields: &ParsedFields, name: &str) -> Option<u32> {
    fields
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, v)| v.as_slice().try_into().ok())
        .map(u32::from_be_bytes)
}

pub fn get_bytes(fields: &ParsedFields, name: &str) -> Option<Vec<u8>> {
    fields.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone())
}

pub fn has_all(fields: &ParsedFields, names: &[&str]) -> bool {
    names.iter().all(|n| fields.iter().any(|(fname, _)| fname == n))
}
