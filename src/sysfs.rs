//! Typed access to kernel-exposed device attribute files.
//!
//! Every hardware controller in the daemon is built from
//! [`AttributeProperty`] instances: one typed, bidirectional accessor per
//! sysfs endpoint. A property holds a read path and a write path (usually
//! the same file), opens the file fresh on every operation so reads always
//! reflect current hardware state, and converts the textual payload through
//! a codec that supplies only the two pure functions `parse` and `format`.
//!
//! Optional hardware is the norm on laptops, so callers are expected to
//! gate every feature on [`AttributeProperty::is_available`] and to prefer
//! [`AttributeProperty::read_opt`] inside control loops, where one missing
//! attribute must not abort the whole tick.

use std::collections::BTreeSet;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::range_set::{format_range_list, parse_range_list};

/// Conversion between the textual payload of an attribute file and a typed
/// value. Implementations are stateless.
pub trait AttrCodec {
    type Value;

    fn parse(text: &str) -> Result<Self::Value>;
    fn format(value: &Self::Value) -> String;
}

/// Trimmed string, e.g. `scaling_governor`.
pub struct Text;

impl AttrCodec for Text {
    type Value = String;

    fn parse(text: &str) -> Result<String> {
        Ok(text.trim().to_string())
    }

    fn format(value: &String) -> String {
        value.clone()
    }
}

/// Boolean encoded as `"1"` / `"0"`, e.g. `online` or AC presence.
pub struct Flag;

impl AttrCodec for Flag {
    type Value = bool;

    fn parse(text: &str) -> Result<bool> {
        let nr: i64 = text
            .trim()
            .parse()
            .with_context(|| format!("not a boolean attribute payload: {text:?}"))?;
        Ok(nr == 1)
    }

    fn format(value: &bool) -> String {
        if *value { "1".to_string() } else { "0".to_string() }
    }
}

/// Signed decimal integer, e.g. `scaling_max_freq`.
pub struct Decimal;

impl AttrCodec for Decimal {
    type Value = i64;

    fn parse(text: &str) -> Result<i64> {
        text.trim()
            .parse()
            .with_context(|| format!("not a decimal attribute payload: {text:?}"))
    }

    fn format(value: &i64) -> String {
        value.to_string()
    }
}

/// Base-16 integer without a `0x` marker, e.g. keyboard backlight color.
pub struct Hex;

impl AttrCodec for Hex {
    type Value = u64;

    fn parse(text: &str) -> Result<u64> {
        u64::from_str_radix(text.trim(), 16)
            .with_context(|| format!("not a hexadecimal attribute payload: {text:?}"))
    }

    fn format(value: &u64) -> String {
        format!("{value:x}")
    }
}

/// Space-separated word list, e.g. `scaling_available_governors`.
pub struct WordList;

impl AttrCodec for WordList {
    type Value = Vec<String>;

    fn parse(text: &str) -> Result<Vec<String>> {
        Ok(text.split_whitespace().map(str::to_string).collect())
    }

    fn format(value: &Vec<String>) -> String {
        value.join(" ")
    }
}

/// Comma-separated integer/range list, e.g. `online` core masks. Parsing is
/// tolerant: malformed tokens are dropped, never reported.
pub struct RangeList;

impl AttrCodec for RangeList {
    type Value = BTreeSet<u32>;

    fn parse(text: &str) -> Result<BTreeSet<u32>> {
        Ok(parse_range_list(text))
    }

    fn format(value: &BTreeSet<u32>) -> String {
        format_range_list(value)
    }
}

/// One typed sysfs endpoint. Holds no file descriptor; each operation is a
/// fresh open/close, so values never go stale.
pub struct AttributeProperty<C: AttrCodec> {
    read_path: PathBuf,
    write_path: PathBuf,
    _codec: PhantomData<C>,
}

impl<C: AttrCodec> Clone for AttributeProperty<C> {
    fn clone(&self) -> Self {
        Self {
            read_path: self.read_path.clone(),
            write_path: self.write_path.clone(),
            _codec: PhantomData,
        }
    }
}

pub type StringAttr = AttributeProperty<Text>;
pub type BoolAttr = AttributeProperty<Flag>;
pub type IntAttr = AttributeProperty<Decimal>;
pub type HexAttr = AttributeProperty<Hex>;
pub type StringListAttr = AttributeProperty<WordList>;
pub type RangeListAttr = AttributeProperty<RangeList>;

impl<C: AttrCodec> AttributeProperty<C> {
    /// Property whose read and write paths are the same file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            write_path: path.clone(),
            read_path: path,
            _codec: PhantomData,
        }
    }

    /// Property with distinct sensor and actuator endpoints addressing the
    /// same logical attribute.
    pub fn with_write_path(read_path: impl Into<PathBuf>, write_path: impl Into<PathBuf>) -> Self {
        Self {
            read_path: read_path.into(),
            write_path: write_path.into(),
            _codec: PhantomData,
        }
    }

    pub fn read_path(&self) -> &Path {
        &self.read_path
    }

    pub fn write_path(&self) -> &Path {
        &self.write_path
    }

    /// Reads and converts the attribute, failing on I/O or parse errors.
    pub fn read(&self) -> Result<C::Value> {
        let text = fs::read_to_string(&self.read_path)
            .with_context(|| format!("could not read attribute {}", self.read_path.display()))?;
        C::parse(&text)
            .with_context(|| format!("could not convert attribute {}", self.read_path.display()))
    }

    /// Like [`read`](Self::read) but swallows every failure. Control loops
    /// use this so one unsupported attribute does not abort a tick.
    pub fn read_opt(&self) -> Option<C::Value> {
        fs::read_to_string(&self.read_path)
            .ok()
            .and_then(|text| C::parse(&text).ok())
    }

    /// Converts and writes the value as a whole-file overwrite.
    pub fn write(&self, value: &C::Value) -> Result<()> {
        if !self.write_path.exists() {
            bail!(
                "could not write attribute, no such file: {}",
                self.write_path.display()
            );
        }
        let text = C::format(value);
        fs::write(&self.write_path, &text).with_context(|| {
            format!(
                "could not write {:?} to attribute {}",
                text,
                self.write_path.display()
            )
        })
    }

    /// True only if both paths exist and the read path answers a trial
    /// read. Every controller checks this before touching a feature.
    pub fn is_available(&self) -> bool {
        self.read_path.exists()
            && self.write_path.exists()
            && fs::read(&self.read_path).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn attr_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn string_attr_trims_payload() {
        let dir = TempDir::new().unwrap();
        let path = attr_file(&dir, "scaling_governor", "powersave\n");
        let attr = StringAttr::new(&path);
        assert_eq!(attr.read().unwrap(), "powersave");
    }

    #[test]
    fn bool_attr_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = attr_file(&dir, "online", "1\n");
        let attr = BoolAttr::new(&path);
        assert!(attr.read().unwrap());

        attr.write(&false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0");
        assert!(!attr.read().unwrap());
    }

    #[test]
    fn int_attr_parses_decimal() {
        let dir = TempDir::new().unwrap();
        let path = attr_file(&dir, "scaling_max_freq", "4200000\n");
        let attr = IntAttr::new(&path);
        assert_eq!(attr.read().unwrap(), 4_200_000);

        attr.write(&1_200_000).unwrap();
        assert_eq!(attr.read().unwrap(), 1_200_000);
    }

    #[test]
    fn hex_attr_has_no_prefix() {
        let dir = TempDir::new().unwrap();
        let path = attr_file(&dir, "color", "ff00aa\n");
        let attr = HexAttr::new(&path);
        assert_eq!(attr.read().unwrap(), 0x00ff_00aa);

        attr.write(&0x12_34ab).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1234ab");
    }

    #[test]
    fn string_list_attr_splits_on_whitespace() {
        let dir = TempDir::new().unwrap();
        let path = attr_file(&dir, "governors", "performance powersave \n");
        let attr = StringListAttr::new(&path);
        assert_eq!(attr.read().unwrap(), vec!["performance", "powersave"]);
    }

    #[test]
    fn range_list_attr_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = attr_file(&dir, "online", "0-3,6\n");
        let attr = RangeListAttr::new(&path);
        let cores: BTreeSet<u32> = [0, 1, 2, 3, 6].into_iter().collect();
        assert_eq!(attr.read().unwrap(), cores);

        let fewer: BTreeSet<u32> = [0, 1].into_iter().collect();
        attr.write(&fewer).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0-1");
    }

    #[test]
    fn read_fails_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let attr = IntAttr::new(dir.path().join("nonexistent"));
        assert!(attr.read().is_err());
    }

    #[test]
    fn read_fails_on_garbage_payload() {
        let dir = TempDir::new().unwrap();
        let path = attr_file(&dir, "freq", "not-a-number\n");
        let attr = IntAttr::new(&path);
        assert!(attr.read().is_err());
    }

    #[test]
    fn read_opt_never_errors() {
        let dir = TempDir::new().unwrap();
        let missing = IntAttr::new(dir.path().join("nonexistent"));
        assert_eq!(missing.read_opt(), None);

        let garbage = IntAttr::new(attr_file(&dir, "freq", "garbage"));
        assert_eq!(garbage.read_opt(), None);

        let good = IntAttr::new(attr_file(&dir, "freq2", "7\n"));
        assert_eq!(good.read_opt(), Some(7));
    }

    #[test]
    fn write_fails_when_path_missing() {
        let dir = TempDir::new().unwrap();
        let attr = BoolAttr::new(dir.path().join("nonexistent"));
        assert!(attr.write(&true).is_err());
    }

    #[test]
    fn availability_requires_both_paths() {
        let dir = TempDir::new().unwrap();
        let present = attr_file(&dir, "present", "1");

        assert!(BoolAttr::new(&present).is_available());
        assert!(!BoolAttr::new(dir.path().join("nonexistent")).is_available());

        let split = BoolAttr::with_write_path(&present, dir.path().join("nonexistent"));
        assert!(!split.is_available());
    }

    #[test]
    fn distinct_read_and_write_paths() {
        let dir = TempDir::new().unwrap();
        let sensor = attr_file(&dir, "temp_input", "55\n");
        let actuator = attr_file(&dir, "pwm", "0");
        let attr = IntAttr::with_write_path(&sensor, &actuator);

        assert_eq!(attr.read().unwrap(), 55);
        attr.write(&128).unwrap();
        assert_eq!(fs::read_to_string(&actuator).unwrap(), "128");
        // The sensor side is untouched.
        assert_eq!(attr.read().unwrap(), 55);
    }
}
