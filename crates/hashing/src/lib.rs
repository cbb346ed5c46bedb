#![deny(warnings)]
#![allow(clippy::len_without_is_empty, clippy::too_many_arguments)]

//! Content-addressing primitives shared by every part of the execution subsystem: bundles,
//! input files, and output files are all identified by the digest of their bytes.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use digest::consts::U32;
use generic_array::GenericArray;
use serde::de::{MapAccess, Visitor};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::{Deserialize, Deserializer};
use sha2::{Digest as Sha256Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite};

pub const EMPTY_FINGERPRINT: Fingerprint = Fingerprint([
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
    0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
]);
pub const EMPTY_DIGEST: Digest = Digest {
    hash: EMPTY_FINGERPRINT,
    size_bytes: 0,
};

pub const FINGERPRINT_SIZE: usize = 32;

/// A lowercase-hex sha256 digest of some bytes.
#[derive(Clone, Copy, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Fingerprint(pub [u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    pub fn from_bytes(bytes: GenericArray<u8, U32>) -> Fingerprint {
        Fingerprint(bytes.into())
    }

    pub fn from_hex_string(hex_string: &str) -> Result<Fingerprint, String> {
        <[u8; FINGERPRINT_SIZE] as hex::FromHex>::from_hex(hex_string)
            .map(Fingerprint)
            .map_err(|e| format!("{e:?}"))
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }

    #[allow(clippy::wrong_self_convention)]
    pub fn to_hex(&self) -> String {
        let mut s = String::new();
        for &byte in &self.0 {
            fmt::Write::write_fmt(&mut s, format_args!("{byte:02x}")).unwrap();
        }
        s
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint<{}>", self.to_hex())
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_hex().as_str())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FingerprintVisitor;

        impl<'de> Visitor<'de> for FingerprintVisitor {
            type Value = Fingerprint;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a hex-encoded sha256 digest")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Fingerprint::from_hex_string(v).map_err(|err| {
                    serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(&format!("{v:?}: {err}")),
                        &format!("a hex representation of a {FINGERPRINT_SIZE} byte value")
                            .as_str(),
                    )
                })
            }
        }

        deserializer.deserialize_str(FingerprintVisitor)
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fingerprint::from_hex_string(s)
    }
}

impl TryFrom<&str> for Fingerprint {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Fingerprint::from_hex_string(s)
    }
}

/// A fingerprint together with the size in bytes of the data it was computed from. Carried
/// alongside every bundle, input file, and output file so sizes never need a second round trip.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Digest {
    pub hash: Fingerprint,
    pub size_bytes: usize,
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut obj = serializer.serialize_struct("digest", 2)?;
        obj.serialize_field("fingerprint", &self.hash)?;
        obj.serialize_field("size_bytes", &self.size_bytes)?;
        obj.end()
    }
}

#[derive(Deserialize)]
#[serde(field_identifier, rename_all = "snake_case")]
enum Field {
    Fingerprint,
    SizeBytes,
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DigestVisitor;

        impl<'de> Visitor<'de> for DigestVisitor {
            type Value = Digest;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("struct digest")
            }

            fn visit_map<V>(self, mut map: V) -> Result<Digest, V::Error>
            where
                V: MapAccess<'de>,
            {
                use serde::de;

                let mut fingerprint = None;
                let mut size_bytes = None;
                while let Some(key) = map.next_key()? {
                    match key {
                        Field::Fingerprint => {
                            if fingerprint.is_some() {
                                return Err(de::Error::duplicate_field("fingerprint"));
                            }
                            fingerprint = Some(map.next_value()?);
                        }
                        Field::SizeBytes => {
                            if size_bytes.is_some() {
                                return Err(de::Error::duplicate_field("size_bytes"));
                            }
                            size_bytes = Some(map.next_value()?);
                        }
                    }
                }
                let fingerprint =
                    fingerprint.ok_or_else(|| de::Error::missing_field("fingerprint"))?;
                let size_bytes =
                    size_bytes.ok_or_else(|| de::Error::missing_field("size_bytes"))?;
                Ok(Digest::new(fingerprint, size_bytes))
            }
        }

        const FIELDS: &[&str] = &["fingerprint", "size_bytes"];
        deserializer.deserialize_struct("digest", FIELDS, DigestVisitor)
    }
}

impl Digest {
    pub fn new(hash: Fingerprint, size_bytes: usize) -> Digest {
        Digest { hash, size_bytes }
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::default();
        hasher.update(bytes);
        Digest::new(Fingerprint::from_bytes(hasher.finalize()), bytes.len())
    }
}

/// A `Write` instance that fingerprints all data that passes through it, so a file's digest can
/// be computed in the same pass that writes it to disk or uploads it.
pub struct WriterHasher<T> {
    hasher: Sha256,
    byte_count: usize,
    inner: T,
}

impl<T> WriterHasher<T> {
    pub fn new(inner: T) -> WriterHasher<T> {
        WriterHasher {
            hasher: Sha256::default(),
            byte_count: 0,
            inner,
        }
    }

    /// Consumes the wrapper, returning the digest of everything written plus the inner value.
    pub fn finish(self) -> (Digest, T) {
        (
            Digest::new(
                Fingerprint::from_bytes(self.hasher.finalize()),
                self.byte_count,
            ),
            self.inner,
        )
    }
}

impl<W: Write> Write for WriterHasher<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[0..written]);
        self.byte_count += written;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copies from `reader` to `writer`, hashing the bytes in the same pass.
pub async fn async_copy_and_hash<R, W>(reader: &mut R, writer: &mut W) -> tokio::io::Result<Digest>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut hasher = Sha256::default();
    let mut byte_count: usize = 0;
    let mut buf = [0u8; 8192];
    loop {
        let n = tokio::io::AsyncReadExt::read(reader, &mut buf).await?;
        if n == 0 {
            break;
        }
        tokio::io::AsyncWriteExt::write_all(writer, &buf[..n]).await?;
        hasher.update(&buf[..n]);
        byte_count += n;
    }
    Ok(Digest::new(
        Fingerprint::from_bytes(hasher.finalize()),
        byte_count,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_digest_matches_canonical_empty_sha256() {
        assert_eq!(Digest::of_bytes(b""), EMPTY_DIGEST);
        assert_eq!(
            EMPTY_FINGERPRINT.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn fingerprint_round_trips_through_hex() {
        let digest = Digest::of_bytes(b"5\n");
        let hex = digest.hash.to_hex();
        assert_eq!(Fingerprint::from_hex_string(&hex).unwrap(), digest.hash);
    }

    #[test]
    fn digest_round_trips_through_json() {
        let digest = Digest::of_bytes(b"hello reproserver");
        let json = serde_json::to_string(&digest).unwrap();
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(digest, back);
    }

    #[tokio::test]
    async fn async_copy_and_hash_matches_of_bytes() {
        let data = b"streamed output file contents";
        let mut reader = &data[..];
        let mut writer = Vec::new();
        let digest = async_copy_and_hash(&mut reader, &mut writer).await.unwrap();
        assert_eq!(digest, Digest::of_bytes(data));
        assert_eq!(writer, data);
    }
}
