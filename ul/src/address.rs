//! Addresses of application entities.
//!
//! An application entity (AE) is reached through a network address
//! and identified by an AE title.
//! Both can be written together as `«ae_title»@«host»:«port»`,
//! which is parsed into a [`FullAeAddr`] (AE title required)
//! or an [`AeAddr`] (AE title optional).
//! The network part can be an IPv4 or IPv6 socket address
//! or a host name.
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use snafu::{ensure, AsErrorSource, ResultExt, Snafu};

/// The maximum length of an AE title.
pub const MAX_AE_TITLE_LENGTH: usize = 16;

/// An error which occurred when parsing an AE address.
#[derive(Debug, Clone, Eq, PartialEq, Snafu)]
pub enum ParseAeAddressError<E>
where
    E: fmt::Debug + AsErrorSource,
{
    /// Missing AE title in full AE address
    MissingAeTitle,

    #[snafu(display(
        "AE title `{}` is longer than {} characters",
        ae_title,
        MAX_AE_TITLE_LENGTH
    ))]
    AeTitleTooLong { ae_title: String },

    /// Could not parse network socket address
    ParseSocketAddress { source: E },
}

/// Split `«ae_title»@«address»` at the first `@`.
///
/// An empty AE title is the same as no AE title.
fn split_ae_title(s: &str) -> (Option<&str>, &str) {
    match s.split_once('@') {
        Some(("", address)) => (None, address),
        Some((ae_title, address)) => (Some(ae_title), address),
        None => (None, s),
    }
}

fn check_ae_title<E>(ae_title: &str) -> Result<(), ParseAeAddressError<E>>
where
    E: fmt::Debug + AsErrorSource,
{
    ensure!(
        ae_title.trim().len() <= MAX_AE_TITLE_LENGTH,
        AeTitleTooLongSnafu { ae_title }
    );
    Ok(())
}

/// The address of an application entity with a known AE title.
///
/// # Example
///
/// ```
/// # use dicom_ulp::FullAeAddr;
/// # use std::net::SocketAddr;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let addr: FullAeAddr<SocketAddr> = "STORE-SCP@127.0.0.1:104".parse()?;
/// assert_eq!(addr.ae_title(), "STORE-SCP");
/// assert_eq!(addr.socket_addr(), &SocketAddr::from(([127, 0, 0, 1], 104)));
/// assert_eq!(addr.to_string(), "STORE-SCP@127.0.0.1:104");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FullAeAddr<T> {
    ae_title: String,
    socket_addr: T,
}

impl<T> FullAeAddr<T> {
    pub fn new(ae_title: impl Into<String>, socket_addr: T) -> Self {
        FullAeAddr {
            ae_title: ae_title.into(),
            socket_addr,
        }
    }

    pub fn ae_title(&self) -> &str {
        &self.ae_title
    }

    pub fn socket_addr(&self) -> &T {
        &self.socket_addr
    }

    pub fn into_parts(self) -> (String, T) {
        (self.ae_title, self.socket_addr)
    }
}

impl<T> FromStr for FullAeAddr<T>
where
    T: FromStr,
    T::Err: fmt::Debug + AsErrorSource,
{
    type Err = ParseAeAddressError<T::Err>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match split_ae_title(s) {
            (Some(ae_title), address) => {
                check_ae_title(ae_title)?;
                Ok(FullAeAddr {
                    ae_title: ae_title.to_string(),
                    socket_addr: address.parse().context(ParseSocketAddressSnafu)?,
                })
            }
            (None, _) => MissingAeTitleSnafu.fail(),
        }
    }
}

impl<T> ToSocketAddrs for FullAeAddr<T>
where
    T: ToSocketAddrs,
{
    type Iter = T::Iter;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        self.socket_addr.to_socket_addrs()
    }
}

impl<T> fmt::Display for FullAeAddr<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ae_title, self.socket_addr)
    }
}

/// The address of an application entity
/// which may or may not include the AE title.
///
/// # Example
///
/// ```
/// # use dicom_ulp::AeAddr;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let addr: AeAddr<String> = "pacs.example.com:11112".parse()?;
/// assert_eq!(addr.ae_title(), None);
/// let full = addr.with_default_ae_title("ANY-SCP");
/// assert_eq!(full.to_string(), "ANY-SCP@pacs.example.com:11112");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AeAddr<T> {
    ae_title: Option<String>,
    socket_addr: T,
}

impl<T> AeAddr<T> {
    pub fn new(ae_title: impl Into<String>, socket_addr: T) -> Self {
        AeAddr {
            ae_title: Some(ae_title.into()),
            socket_addr,
        }
    }

    /// Create an address without an AE title.
    pub fn new_socket_addr(socket_addr: T) -> Self {
        AeAddr {
            ae_title: None,
            socket_addr,
        }
    }

    pub fn ae_title(&self) -> Option<&str> {
        self.ae_title.as_deref()
    }

    pub fn socket_addr(&self) -> &T {
        &self.socket_addr
    }

    /// Complete the address,
    /// using the given AE title if it is missing.
    pub fn with_default_ae_title(self, ae_title: impl Into<String>) -> FullAeAddr<T> {
        FullAeAddr {
            ae_title: self.ae_title.unwrap_or_else(|| ae_title.into()),
            socket_addr: self.socket_addr,
        }
    }

    pub fn into_parts(self) -> (Option<String>, T) {
        (self.ae_title, self.socket_addr)
    }
}

impl From<SocketAddr> for AeAddr<SocketAddr> {
    fn from(socket_addr: SocketAddr) -> Self {
        AeAddr::new_socket_addr(socket_addr)
    }
}

impl<T> From<FullAeAddr<T>> for AeAddr<T> {
    fn from(full: FullAeAddr<T>) -> Self {
        AeAddr {
            ae_title: Some(full.ae_title),
            socket_addr: full.socket_addr,
        }
    }
}

impl<T> FromStr for AeAddr<T>
where
    T: FromStr,
    T::Err: fmt::Debug + AsErrorSource,
{
    type Err = ParseAeAddressError<T::Err>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ae_title, address) = split_ae_title(s);
        if let Some(ae_title) = ae_title {
            check_ae_title(ae_title)?;
        }
        Ok(AeAddr {
            ae_title: ae_title.map(String::from),
            socket_addr: address.parse().context(ParseSocketAddressSnafu)?,
        })
    }
}

impl<T> ToSocketAddrs for AeAddr<T>
where
    T: ToSocketAddrs,
{
    type Iter = T::Iter;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        self.socket_addr.to_socket_addrs()
    }
}

impl<T> fmt::Display for AeAddr<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ae_title {
            Some(ae_title) => write!(f, "{}@{}", ae_title, self.socket_addr),
            None => write!(f, "{}", self.socket_addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;
    use std::net::SocketAddrV4;

    #[test]
    fn full_address() {
        let addr: FullAeAddr<String> = "STORE-SCP@pacs.example.com:104".parse().unwrap();
        assert_eq!(addr.ae_title(), "STORE-SCP");
        assert_eq!(addr.socket_addr(), "pacs.example.com:104");

        let addr: FullAeAddr<SocketAddrV4> = "MAMMO@10.0.0.11:104".parse().unwrap();
        assert_eq!(
            addr.socket_addr(),
            &SocketAddrV4::new([10, 0, 0, 11].into(), 104)
        );
        assert_eq!(addr.to_string(), "MAMMO@10.0.0.11:104");
    }

    #[test]
    fn full_address_needs_ae_title() {
        assert_matches!(
            "pacs.example.com:104".parse::<FullAeAddr<String>>(),
            Err(ParseAeAddressError::MissingAeTitle)
        );
        assert_matches!(
            "@pacs.example.com:104".parse::<FullAeAddr<String>>(),
            Err(ParseAeAddressError::MissingAeTitle)
        );
    }

    #[test]
    fn optional_ae_title() {
        let addr: AeAddr<String> = "pacs.example.com:104".parse().unwrap();
        assert_eq!(addr.ae_title(), None);
        let addr: AeAddr<String> = "@pacs.example.com:104".parse().unwrap();
        assert_eq!(addr.ae_title(), None);
        let addr: AeAddr<String> = "QR@pacs.example.com:104".parse().unwrap();
        assert_eq!(addr.ae_title(), Some("QR"));
        assert_eq!(addr.to_string(), "QR@pacs.example.com:104");
    }

    #[test]
    fn bad_addresses() {
        assert_matches!(
            "A-VERY-LONG-AE-TITLE@127.0.0.1:104".parse::<AeAddr<SocketAddr>>(),
            Err(ParseAeAddressError::AeTitleTooLong { .. })
        );
        assert_matches!(
            "SCP@127.0.0.1".parse::<AeAddr<SocketAddr>>(),
            Err(ParseAeAddressError::ParseSocketAddress { .. })
        );
    }
}
