pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Key,
    Tsig,
    Transfer,
    Update,
    Zone,
    Io,
    Json,
    Addr,
    Cidr,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: Some(message.into()),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => self.kind.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ErrorKind::*;

        match self {
            Config => write!(f, "configuration error"),
            Key => write!(f, "key file error"),
            Tsig => write!(f, "tsig error"),
            Transfer => write!(f, "zone transfer error"),
            Update => write!(f, "dynamic update error"),
            Zone => write!(f, "zone error"),
            Io => write!(f, "io error"),
            Json => write!(f, "json error"),
            Addr => write!(f, "address parse error"),
            Cidr => write!(f, "cidr parse error"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::new(ErrorKind::Json, value.to_string())
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(value: std::net::AddrParseError) -> Self {
        Error::new(ErrorKind::Addr, value.to_string())
    }
}

impl From<ipnetwork::IpNetworkError> for Error {
    fn from(value: ipnetwork::IpNetworkError) -> Self {
        Error::new(ErrorKind::Cidr, value.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(value: base64::DecodeError) -> Self {
        Error::new(ErrorKind::Key, value.to_string())
    }
}

impl From<domain::base::name::FromStrError> for Error {
    fn from(value: domain::base::name::FromStrError) -> Self {
        Error::new(ErrorKind::Key, value.to_string())
    }
}
