/// Character sets a connection may negotiate. Anything that is not latin1 is
/// treated as a UTF-8 family set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Latin1,
}

impl Charset {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "latin1" | "iso-8859-1" | "iso8859_1" => Charset::Latin1,
            _ => Charset::Utf8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "utf8mb4",
            Charset::Latin1 => "latin1",
        }
    }

    pub fn encode(self, value: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => value.as_bytes().to_vec(),
            Charset::Latin1 => value
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }
}
