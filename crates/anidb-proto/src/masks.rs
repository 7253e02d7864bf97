//! Static field-mask registry (C3).
//!
//! The field table is a compile-time array rather than the dynamically
//! attached attributes the source implementation used (see spec.md §9,
//! "metaclass-style field registries"). Lookup by name goes through a
//! lazily-built name→index map so repeated lookups don't rescan the table.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Which bitmask a field is selected through, and (for the response body)
/// which logical group it decodes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldCategory {
    /// Selected via the 5-byte `fmask` on a `FILE` query.
    FileFmask,
    /// Selected via the 4-byte `amask` on a `FILE` query (anime fields
    /// returned alongside the file).
    FileAmask,
    /// Selected via the anime-standalone mask. Not wired to any documented
    /// wire command (see DESIGN.md); modeled so the registry is complete
    /// across all three categories named in spec.md §3.
    AnimeAmask,
}

impl FieldCategory {
    /// `BYTE_LENGTH` from spec.md §4.3.
    pub const fn byte_length(self) -> usize {
        match self {
            FieldCategory::FileFmask => 5,
            FieldCategory::FileAmask => 4,
            FieldCategory::AnimeAmask => 5,
        }
    }
}

/// The semantic type used to deserialise a field's raw string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Str,
    Timestamp,
    ListStr,
    ListInt,
    Opaque,
}

/// A named, positioned field in one of the three masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub category: FieldCategory,
    /// 1-based byte position within the mask.
    pub byte: u8,
    /// 0-7, MSB = 7.
    pub bit: u8,
    pub ty: FieldType,
}

use FieldCategory::*;
use FieldType::*;

/// The full field table. Ordering here is cosmetic; the registry sorts on
/// demand by `(category, byte asc, bit desc)`, the server's serialisation
/// order (spec.md §3).
pub static FIELDS: &[FieldDescriptor] = &[
    // fmask (file), byte·bit per spec.md §6 normative field table.
    FieldDescriptor { name: "aid", category: FileFmask, byte: 1, bit: 6, ty: Integer },
    FieldDescriptor { name: "eid", category: FileFmask, byte: 1, bit: 5, ty: Integer },
    FieldDescriptor { name: "gid", category: FileFmask, byte: 1, bit: 4, ty: Integer },
    FieldDescriptor { name: "lid", category: FileFmask, byte: 1, bit: 3, ty: Integer },
    FieldDescriptor { name: "other_episodes", category: FileFmask, byte: 1, bit: 2, ty: Opaque },
    FieldDescriptor { name: "is_deprecated", category: FileFmask, byte: 1, bit: 1, ty: Integer },
    FieldDescriptor { name: "file_state", category: FileFmask, byte: 1, bit: 0, ty: Integer },
    FieldDescriptor { name: "size", category: FileFmask, byte: 2, bit: 7, ty: Integer },
    FieldDescriptor { name: "ed2k", category: FileFmask, byte: 2, bit: 6, ty: Str },
    FieldDescriptor { name: "md5", category: FileFmask, byte: 2, bit: 5, ty: Str },
    FieldDescriptor { name: "sha1", category: FileFmask, byte: 2, bit: 4, ty: Str },
    FieldDescriptor { name: "crc32", category: FileFmask, byte: 2, bit: 3, ty: Str },
    FieldDescriptor { name: "color_depth", category: FileFmask, byte: 2, bit: 1, ty: Str },
    FieldDescriptor { name: "quality", category: FileFmask, byte: 3, bit: 7, ty: Str },
    FieldDescriptor { name: "source", category: FileFmask, byte: 3, bit: 6, ty: Str },
    FieldDescriptor { name: "audio_codec", category: FileFmask, byte: 3, bit: 5, ty: ListStr },
    FieldDescriptor { name: "audio_bitrate", category: FileFmask, byte: 3, bit: 4, ty: ListInt },
    FieldDescriptor { name: "video_codec", category: FileFmask, byte: 3, bit: 3, ty: Str },
    FieldDescriptor { name: "video_bitrate", category: FileFmask, byte: 3, bit: 2, ty: Integer },
    FieldDescriptor { name: "resolution", category: FileFmask, byte: 3, bit: 1, ty: Str },
    FieldDescriptor { name: "filetype", category: FileFmask, byte: 3, bit: 0, ty: Str },
    FieldDescriptor { name: "dub_language", category: FileFmask, byte: 4, bit: 7, ty: Str },
    FieldDescriptor { name: "sub_language", category: FileFmask, byte: 4, bit: 6, ty: Str },
    FieldDescriptor { name: "length", category: FileFmask, byte: 4, bit: 5, ty: Integer },
    FieldDescriptor { name: "description", category: FileFmask, byte: 4, bit: 4, ty: Str },
    FieldDescriptor { name: "aired", category: FileFmask, byte: 4, bit: 3, ty: Timestamp },
    FieldDescriptor { name: "filename", category: FileFmask, byte: 4, bit: 0, ty: Str },
    FieldDescriptor { name: "mylist_state", category: FileFmask, byte: 5, bit: 7, ty: Integer },
    FieldDescriptor { name: "mylist_filestate", category: FileFmask, byte: 5, bit: 6, ty: Integer },
    FieldDescriptor { name: "mylist_viewed", category: FileFmask, byte: 5, bit: 5, ty: Integer },
    FieldDescriptor { name: "mylist_viewdate", category: FileFmask, byte: 5, bit: 4, ty: Timestamp },
    FieldDescriptor { name: "mylist_storage", category: FileFmask, byte: 5, bit: 3, ty: Str },
    FieldDescriptor { name: "mylist_source", category: FileFmask, byte: 5, bit: 2, ty: Str },
    FieldDescriptor { name: "mylist_other", category: FileFmask, byte: 5, bit: 1, ty: Str },
    // file-amask (anime fields returned alongside a FILE query), 4 bytes.
    FieldDescriptor { name: "total_episodes", category: FileAmask, byte: 1, bit: 7, ty: Integer },
    FieldDescriptor { name: "highest_episode_number", category: FileAmask, byte: 1, bit: 6, ty: Integer },
    FieldDescriptor { name: "year", category: FileAmask, byte: 1, bit: 5, ty: Str },
    FieldDescriptor { name: "anime_type", category: FileAmask, byte: 1, bit: 4, ty: Str },
    FieldDescriptor { name: "related_aid_list", category: FileAmask, byte: 1, bit: 3, ty: ListInt },
    FieldDescriptor { name: "related_aid_type", category: FileAmask, byte: 1, bit: 2, ty: ListStr },
    FieldDescriptor { name: "category_list", category: FileAmask, byte: 1, bit: 1, ty: ListStr },
    FieldDescriptor { name: "romaji_name", category: FileAmask, byte: 2, bit: 7, ty: Str },
    FieldDescriptor { name: "kanji_name", category: FileAmask, byte: 2, bit: 6, ty: Str },
    FieldDescriptor { name: "english_name", category: FileAmask, byte: 2, bit: 5, ty: Str },
    FieldDescriptor { name: "other_name", category: FileAmask, byte: 2, bit: 4, ty: ListStr },
    FieldDescriptor { name: "short_name_list", category: FileAmask, byte: 2, bit: 3, ty: ListStr },
    FieldDescriptor { name: "synonym_list", category: FileAmask, byte: 2, bit: 2, ty: ListStr },
    FieldDescriptor { name: "episode_number", category: FileAmask, byte: 3, bit: 7, ty: Str },
    FieldDescriptor { name: "episode_name", category: FileAmask, byte: 3, bit: 6, ty: Str },
    FieldDescriptor { name: "episode_name_romaji", category: FileAmask, byte: 3, bit: 5, ty: Str },
    FieldDescriptor { name: "episode_name_kanji", category: FileAmask, byte: 3, bit: 4, ty: Str },
    FieldDescriptor { name: "episode_rating", category: FileAmask, byte: 3, bit: 3, ty: Str },
    FieldDescriptor { name: "episode_vote_count", category: FileAmask, byte: 3, bit: 2, ty: Integer },
    FieldDescriptor { name: "group_name", category: FileAmask, byte: 4, bit: 7, ty: Str },
    FieldDescriptor { name: "group_short_name", category: FileAmask, byte: 4, bit: 6, ty: Str },
    FieldDescriptor { name: "date_record_updated", category: FileAmask, byte: 4, bit: 0, ty: Timestamp },
    // anime-amask (standalone anime fields), 5 bytes. Not wired to a
    // documented wire command; see DESIGN.md.
    FieldDescriptor { name: "std_aid", category: AnimeAmask, byte: 1, bit: 7, ty: Integer },
    FieldDescriptor { name: "std_romaji_name", category: AnimeAmask, byte: 1, bit: 6, ty: Str },
    FieldDescriptor { name: "std_kanji_name", category: AnimeAmask, byte: 1, bit: 5, ty: Str },
    FieldDescriptor { name: "std_english_name", category: AnimeAmask, byte: 1, bit: 4, ty: Str },
    FieldDescriptor { name: "std_episodes", category: AnimeAmask, byte: 1, bit: 3, ty: Integer },
    FieldDescriptor { name: "std_type", category: AnimeAmask, byte: 2, bit: 7, ty: Str },
    FieldDescriptor { name: "std_category_list", category: AnimeAmask, byte: 2, bit: 6, ty: ListStr },
    FieldDescriptor { name: "std_air_date", category: AnimeAmask, byte: 2, bit: 5, ty: Timestamp },
];

static NAME_INDEX: LazyLock<HashMap<&'static str, usize>> = LazyLock::new(|| {
    FIELDS
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name, i))
        .collect()
});

/// Looks up a field descriptor by name.
pub fn field_by_name(name: &str) -> Option<&'static FieldDescriptor> {
    NAME_INDEX.get(name).map(|&i| &FIELDS[i])
}

/// Bit weight for `(category, byte, bit)`, per the formula in spec.md §4.3:
/// `1 << (8 * (BYTE_LENGTH - byte) + bit)`.
fn bit_weight(category: FieldCategory, byte: u8, bit: u8) -> u64 {
    let byte_length = category.byte_length() as u32;
    1u64 << (8 * (byte_length - byte as u32) + bit as u32)
}

/// Assembles a bitmask (as a big-endian byte array, one entry per mask byte)
/// selecting the given fields. Panics if a field does not belong to
/// `category` — this is a programmer error, not a runtime one: callers
/// build field sets from [`FIELDS`] filtered by category.
pub fn assemble_bitmask(category: FieldCategory, fields: &[&FieldDescriptor]) -> Vec<u8> {
    let mut mask = vec![0u8; category.byte_length()];
    for f in fields {
        assert_eq!(f.category, category, "field {} is not in {:?}", f.name, category);
        mask[(f.byte - 1) as usize] |= 1 << f.bit;
    }
    mask
}

/// Renders an assembled mask as fixed-width uppercase hex, as required on
/// the wire (10 hex digits for fmask, 8 for amask).
pub fn mask_to_hex(mask: &[u8]) -> String {
    hex::encode_upper(mask)
}

/// Given a numeric mask, lists the fields it selects, sorted by
/// `(byte asc, bit desc)` — the server's column order.
pub fn analyze_bitmask(category: FieldCategory, mask: &[u8]) -> Vec<&'static FieldDescriptor> {
    let mut selected: Vec<&'static FieldDescriptor> = FIELDS
        .iter()
        .filter(|f| f.category == category)
        .filter(|f| mask.get((f.byte - 1) as usize).is_some_and(|b| b & (1 << f.bit) != 0))
        .collect();
    selected.sort_by(|a, b| a.byte.cmp(&b.byte).then(b.bit.cmp(&a.bit)));
    selected
}

/// Sorts a field set into the server's serialisation order, without going
/// through a numeric mask. Used by the codec when it already has the
/// selected [`FieldDescriptor`]s rather than a mask to re-decode.
pub fn sort_fields(mut fields: Vec<&'static FieldDescriptor>) -> Vec<&'static FieldDescriptor> {
    fields.sort_by(|a, b| {
        format!("{:?}", a.category)
            .cmp(&format!("{:?}", b.category))
            .then(a.byte.cmp(&b.byte))
            .then(b.bit.cmp(&a.bit))
    });
    fields
}
