//! TrueType to WOFF2 conversion.
//!
//! Tables are stored with the null transform, so the decoded font is
//! byte-for-byte the table data of the source. The format is described in
//! <https://www.w3.org/TR/WOFF2/>.

use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::config::Config;
use crate::error::{FontError, TaskError};
use crate::namespace::Claim;
use crate::task::{Report, Task, TaskContext, expand_globs, glob_in, write_output};

const OUT_DIR: &str = "fonts";

const SIGNATURE: u32 = 0x774F_4632; // wOF2
const TAG_COLLECTION: &[u8; 4] = b"ttcf";
const HEADER_LEN: usize = 48;

/// Tags with a single byte encoding in the table directory.
const KNOWN_TAGS: [&[u8; 4]; 63] = [
    b"cmap", b"head", b"hhea", b"hmtx", b"maxp", b"name", b"OS/2", b"post", b"cvt ",
    b"fpgm", b"glyf", b"loca", b"prep", b"CFF ", b"VORG", b"EBDT", b"EBLC", b"gasp",
    b"hdmx", b"kern", b"LTSH", b"PCLT", b"VDMX", b"vhea", b"vmtx", b"BASE", b"GDEF",
    b"GPOS", b"GSUB", b"EBSC", b"JSTF", b"MATH", b"CBDT", b"CBLC", b"COLR", b"CPAL",
    b"SVG ", b"sbix", b"acnt", b"avar", b"bdat", b"bloc", b"bsln", b"cvar", b"fdsc",
    b"feat", b"fmtx", b"fvar", b"gvar", b"hsty", b"just", b"lcar", b"mort", b"morx",
    b"opbd", b"prop", b"trak", b"Zapf", b"Silf", b"Glat", b"Gloc", b"Feat", b"Sill",
];

/// Flag value meaning an explicit 4-byte tag follows.
const CUSTOM_TAG: u8 = 63;
/// Transform version 3 is the null transform for `glyf` and `loca`.
const NULL_TRANSFORM_GLYF: u8 = 3 << 6;

// Brotli settings
const QUALITY: u32 = 11;
const WINDOW: u32 = 22;

pub struct Fonts {
    root: Utf8PathBuf,
    dist: Utf8PathBuf,
}

impl Fonts {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.paths.fonts.clone(),
            dist: config.paths.dist.join(OUT_DIR),
        }
    }

    fn convert(&self, path: &Utf8Path) -> Result<Utf8PathBuf, TaskError> {
        let data = fs::read(path)?;
        let woff2 = encode(path, &data)?;

        let stem = path.file_stem().unwrap_or("font");
        let out = self.dist.join(format!("{stem}.woff2"));
        write_output(&out, woff2)?;

        tracing::debug!("{path}: {} -> {} bytes", data.len(), fs::metadata(&out)?.len());
        Ok(out)
    }
}

impl Task for Fonts {
    fn name(&self) -> &str {
        "fonts"
    }

    fn run(&self, ctx: &TaskContext<'_>) -> Result<Report, TaskError> {
        let sources = expand_globs(&[glob_in(&self.root, "*.ttf")])?;

        ctx.set_message(&format!("Converting {} fonts", sources.len()));

        let results: Vec<_> = sources.par_iter().map(|path| self.convert(path)).collect();

        let mut report = Report::new();
        for result in results {
            report.push(result?);
        }

        Ok(report)
    }

    fn watched(&self) -> Vec<String> {
        vec![glob_in(&self.root, "*.ttf")]
    }

    fn claims(&self) -> Vec<Claim> {
        vec![Claim::Flat(OUT_DIR.into())]
    }
}

struct Table<'a> {
    tag: [u8; 4],
    data: &'a [u8],
}

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    let bytes: [u8; 2] = data.get(at..at + 2)?.try_into().ok()?;
    Some(u16::from_be_bytes(bytes))
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Reads the table directory of an sfnt font.
fn parse_sfnt<'a>(path: &Utf8Path, data: &'a [u8]) -> Result<(u32, Vec<Table<'a>>), FontError> {
    let malformed = |reason| FontError::Malformed(path.to_owned(), reason);

    if data.get(0..4) == Some(TAG_COLLECTION.as_slice()) {
        return Err(FontError::Collection(path.to_owned()));
    }

    let flavor = be_u32(data, 0).ok_or_else(|| malformed("truncated header"))?;
    if !matches!(flavor, 0x0001_0000 | 0x4F54_544F | 0x7472_7565) {
        return Err(malformed("unknown sfnt version"));
    }

    let count = be_u16(data, 4).ok_or_else(|| malformed("truncated header"))? as usize;
    if count == 0 {
        return Err(malformed("no tables"));
    }

    let mut tables = Vec::with_capacity(count);
    for i in 0..count {
        let record = 12 + 16 * i;
        let tag: [u8; 4] = data
            .get(record..record + 4)
            .and_then(|tag| tag.try_into().ok())
            .ok_or_else(|| malformed("truncated table directory"))?;
        let offset = be_u32(data, record + 8).ok_or_else(|| malformed("truncated table directory"))?;
        let length = be_u32(data, record + 12).ok_or_else(|| malformed("truncated table directory"))?;

        let start = offset as usize;
        let table = start
            .checked_add(length as usize)
            .and_then(|end| data.get(start..end))
            .ok_or_else(|| malformed("table out of bounds"))?;

        tables.push(Table { tag, data: table });
    }

    let has = |tag: &[u8; 4]| tables.iter().any(|t| &t.tag == tag);
    if has(b"glyf") != has(b"loca") {
        return Err(malformed("glyf and loca must come together"));
    }

    Ok((flavor, tables))
}

/// Orders the tables for the WOFF2 directory: `loca` directly after `glyf`.
fn directory_order(tables: Vec<Table<'_>>) -> Vec<Table<'_>> {
    let (loca, mut rest): (Vec<_>, Vec<_>) = tables.into_iter().partition(|t| &t.tag == b"loca");

    if let Some(loca) = loca.into_iter().next()
        && let Some(glyf) = rest.iter().position(|t| &t.tag == b"glyf")
    {
        rest.insert(glyf + 1, loca);
    }

    rest
}

/// Appends a UIntBase128 encoded value.
fn write_base128(out: &mut Vec<u8>, value: u32) {
    let mut groups = [0u8; 5];
    let mut len = 0;
    let mut rest = value;

    loop {
        groups[len] = (rest & 0x7F) as u8;
        len += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }

    for i in (0..len).rev() {
        let more = if i > 0 { 0x80 } else { 0 };
        out.push(groups[i] | more);
    }
}

fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

/// Converts an sfnt font to WOFF2.
pub(crate) fn encode(path: &Utf8Path, data: &[u8]) -> Result<Vec<u8>, TaskError> {
    let (flavor, tables) = parse_sfnt(path, data)?;
    let tables = directory_order(tables);

    let mut directory = Vec::new();
    let mut stream = Vec::new();

    for table in &tables {
        let known = KNOWN_TAGS.iter().position(|&tag| tag == &table.tag);
        let mut flags = known.map_or(CUSTOM_TAG, |i| i as u8);

        if matches!(&table.tag, b"glyf" | b"loca") {
            flags |= NULL_TRANSFORM_GLYF;
        }

        directory.push(flags);
        if known.is_none() {
            directory.extend_from_slice(&table.tag);
        }
        write_base128(&mut directory, table.data.len() as u32);

        stream.extend_from_slice(table.data);
    }

    let mut compressed = Vec::new();
    {
        let mut writer = brotli::CompressorWriter::new(&mut compressed, 4096, QUALITY, WINDOW);
        writer.write_all(&stream)?;
        writer.flush()?;
    }

    let total_sfnt: usize =
        12 + 16 * tables.len() + tables.iter().map(|t| pad4(t.data.len())).sum::<usize>();
    let length = pad4(HEADER_LEN + directory.len() + compressed.len());

    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(&SIGNATURE.to_be_bytes());
    out.extend_from_slice(&flavor.to_be_bytes());
    out.extend_from_slice(&(length as u32).to_be_bytes());
    out.extend_from_slice(&(tables.len() as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // reserved
    out.extend_from_slice(&(total_sfnt as u32).to_be_bytes());
    out.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // majorVersion
    out.extend_from_slice(&0u16.to_be_bytes()); // minorVersion
    out.extend_from_slice(&[0; 20]); // no metadata, no private data
    debug_assert_eq!(out.len(), HEADER_LEN);

    out.extend_from_slice(&directory);
    out.extend_from_slice(&compressed);
    out.resize(length, 0);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::core::Environment;

    /// Builds an sfnt file from `(tag, data)` pairs, sorted by tag.
    fn sfnt(tables: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
        let mut tables = tables.to_vec();
        tables.sort_by_key(|(tag, _)| **tag);

        let mut out = Vec::new();
        out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        out.extend_from_slice(&(tables.len() as u16).to_be_bytes());
        out.extend_from_slice(&[0; 6]);

        let mut offset = 12 + 16 * tables.len();
        for (tag, data) in &tables {
            out.extend_from_slice(*tag);
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            out.extend_from_slice(&(data.len() as u32).to_be_bytes());
            offset += pad4(data.len());
        }

        for (_, data) in &tables {
            out.extend_from_slice(data);
            out.resize(pad4(out.len()), 0);
        }

        out
    }

    fn read_base128(data: &[u8], at: &mut usize) -> u32 {
        let mut value = 0;
        loop {
            let byte = data[*at];
            *at += 1;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                return value;
            }
        }
    }

    const TABLES: [(&[u8; 4], &[u8]); 5] = [
        (b"head", &[1; 54]),
        (b"cmap", b"cmap table"),
        (b"glyf", &[7; 301]),
        (b"loca", &[0, 0, 1, 45]),
        (b"Zzzz", b"custom"),
    ];

    #[test]
    fn test_header_directory_and_stream() {
        let font = sfnt(&TABLES);
        let woff2 = encode(Utf8Path::new("test.ttf"), &font).unwrap();

        assert_eq!(be_u32(&woff2, 0), Some(SIGNATURE));
        assert_eq!(be_u32(&woff2, 4), Some(0x0001_0000));
        assert_eq!(be_u32(&woff2, 8), Some(woff2.len() as u32));
        assert_eq!(woff2.len() % 4, 0);
        assert_eq!(be_u16(&woff2, 12), Some(5));
        assert_eq!(be_u32(&woff2, 16), Some(font.len() as u32));

        // directory
        let mut at = HEADER_LEN;
        let mut entries = Vec::new();
        for _ in 0..5 {
            let flags = woff2[at];
            at += 1;

            let tag = match flags & 0x3F {
                CUSTOM_TAG => {
                    let tag: [u8; 4] = woff2[at..at + 4].try_into().unwrap();
                    at += 4;
                    tag
                }
                index => *KNOWN_TAGS[index as usize],
            };

            let length = read_base128(&woff2, &mut at);
            entries.push((tag, flags >> 6, length));
        }

        let tags: Vec<_> = entries.iter().map(|(tag, _, _)| tag).collect();
        assert_eq!(tags, vec![b"Zzzz", b"cmap", b"glyf", b"loca", b"head"]);
        assert_eq!(entries[2].1, 3);
        assert_eq!(entries[3].1, 3);
        assert_eq!(entries[0].1, 0);

        // stream
        let compressed_len = be_u32(&woff2, 20).unwrap() as usize;
        let mut stream = Vec::new();
        brotli::Decompressor::new(&woff2[at..at + compressed_len], 4096)
            .read_to_end(&mut stream)
            .unwrap();

        let expected: Vec<u8> = entries
            .iter()
            .flat_map(|(tag, _, _)| {
                TABLES
                    .iter()
                    .find(|(t, _)| *t == tag)
                    .unwrap()
                    .1
                    .iter()
                    .copied()
            })
            .collect();

        assert_eq!(stream, expected);
        assert_eq!(
            entries.iter().map(|e| e.2 as usize).sum::<usize>(),
            stream.len()
        );
    }

    #[test]
    fn test_base128() {
        let encode = |value| {
            let mut out = Vec::new();
            write_base128(&mut out, value);
            out
        };

        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(127), vec![0x7F]);
        assert_eq!(encode(128), vec![0x81, 0x00]);
        assert_eq!(encode(63), vec![0x3F]);
        assert_eq!(encode(u32::MAX), vec![0x8F, 0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_rejects_non_sfnt() {
        let path = Utf8Path::new("x.ttf");

        assert!(matches!(
            encode(path, b"ttcf\0\0\0\0"),
            Err(TaskError::Font(FontError::Collection(_)))
        ));
        assert!(matches!(
            encode(path, b"<html>not a font</html>"),
            Err(TaskError::Font(FontError::Malformed(..)))
        ));

        let mut truncated = sfnt(&TABLES);
        truncated.truncate(100);
        assert!(matches!(
            encode(path, &truncated),
            Err(TaskError::Font(FontError::Malformed(..)))
        ));
    }

    #[test]
    fn test_task_writes_woff2() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let config = Config::default().rooted(&root);

        fs::create_dir_all(&config.paths.fonts).unwrap();
        fs::write(config.paths.fonts.join("Inter.ttf"), sfnt(&TABLES)).unwrap();

        let env = Environment::build();
        let report = Fonts::new(&config).run(&TaskContext::new(&env)).unwrap();

        let out = config.paths.dist.join("fonts/Inter.woff2");
        assert_eq!(report.outputs, vec![out.clone()]);
        assert_eq!(&fs::read(out).unwrap()[..4], b"wOF2");
    }
}
