///
/// On-demand collations resolved from their names.
///
/// `install` asks the engine to call back whenever a statement names a
/// collation it does not know. The callback parses the name for option
/// keywords and registers a comparison for it on the spot, so
/// `order by title collate 'natural'` just works.
///
/// Keywords are matched as substrings of the lower-cased name and combine:
///
/// | keyword                | effect                                       |
/// |------------------------|----------------------------------------------|
/// | `equivalent`           | ignore case, diacritics and width            |
/// | `case`                 | ignore diacritics and width (case matters)   |
/// | `mark`                 | ignore case and width (marks matter)         |
/// | `width`                | ignore case and diacritics (width matters)   |
/// | `glyph`                | ignore width                                 |
/// | `base`                 | ignore diacritics                            |
/// | `alphabet`             | ignore case                                  |
/// | `natural`              | `equivalent` plus `numeric`                  |
/// | `numeric`              | compare digit runs by value                  |
/// | `literal`              | exact code point comparison                  |
/// | `strict`               | no default insensitivity                     |
/// | `backword`, `backward` | reverse the ordering                         |
/// | `reverse`              | same as `backword`                           |
/// | `ordered`              | break ties between equivalent strings        |
///
/// A name with none of the insensitivity keywords (and neither `strict`
/// nor `literal`) ignores case and diacritics.
///
/// The comparison context is boxed and handed to the engine, which frees
/// it through the destroy callback when the collation is replaced or the
/// connection closes.
///

use std::cmp::Ordering;
use std::ffi::{CStr, c_char, c_int, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};

use rusqlite::ffi;
use smallvec::SmallVec;
use tracing::{debug, warn};

/// Comparison options resolved from a collation name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareOptions {
    pub case_insensitive: bool,
    pub diacritic_insensitive: bool,
    pub width_insensitive: bool,
    pub literal: bool,
    pub numeric: bool,
    pub backwards: bool,
    pub forced_ordering: bool,
}

impl CompareOptions {
    pub fn from_collation_name(name: &str) -> Self {
        let name = name.to_lowercase();
        let has = |keyword: &str| name.contains(keyword);
        let mut options = CompareOptions::default();

        let natural = has("natural");
        if has("equivalent") || natural {
            options.case_insensitive = true;
            options.diacritic_insensitive = true;
            options.width_insensitive = true;
        }
        if has("case") {
            options.diacritic_insensitive = true;
            options.width_insensitive = true;
        }
        if has("mark") {
            options.case_insensitive = true;
            options.width_insensitive = true;
        }
        if has("width") {
            options.case_insensitive = true;
            options.diacritic_insensitive = true;
        }
        if has("glyph") {
            options.width_insensitive = true;
        }
        if has("base") {
            options.diacritic_insensitive = true;
        }
        if has("alphabet") {
            options.case_insensitive = true;
        }

        options.literal = has("literal");
        if options.literal {
            options.case_insensitive = false;
            options.diacritic_insensitive = false;
            options.width_insensitive = false;
        } else if !has("strict") && !options.any_insensitive() {
            options.case_insensitive = true;
            options.diacritic_insensitive = true;
        }

        options.numeric = has("numeric") || natural;
        options.backwards = has("backword") || has("backward") || has("reverse");
        options.forced_ordering = has("ordered");
        options
    }

    fn any_insensitive(&self) -> bool {
        self.case_insensitive || self.diacritic_insensitive || self.width_insensitive
    }

    /// Compare two strings under these options.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        let mut ordering = if self.literal {
            a.cmp(b)
        } else {
            let left = self.fold(a);
            let right = self.fold(b);
            let folded = if self.numeric {
                compare_numeric(&left, &right)
            } else {
                left.cmp(&right)
            };
            if folded == Ordering::Equal && self.forced_ordering {
                a.cmp(b)
            } else {
                folded
            }
        };
        if self.backwards {
            ordering = ordering.reverse();
        }
        ordering
    }

    fn fold(&self, text: &str) -> SmallVec<[char; 32]> {
        let mut folded = SmallVec::new();
        for ch in text.chars() {
            let ch = if self.width_insensitive { narrow(ch) } else { ch };
            if self.diacritic_insensitive {
                if is_combining_mark(ch) {
                    continue;
                }
                let base = strip_diacritic(ch);
                if self.case_insensitive {
                    folded.extend(base.to_lowercase());
                } else {
                    folded.push(base);
                }
            } else if self.case_insensitive {
                folded.extend(ch.to_lowercase());
            } else {
                folded.push(ch);
            }
        }
        folded
    }
}

/// Map fullwidth forms onto their ASCII counterparts.
fn narrow(ch: char) -> char {
    match ch {
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(ch as u32 - 0xFEE0).unwrap_or(ch),
        '\u{3000}' => ' ',
        _ => ch,
    }
}

fn is_combining_mark(ch: char) -> bool {
    matches!(ch, '\u{0300}'..='\u{036F}' | '\u{1AB0}'..='\u{1AFF}' | '\u{20D0}'..='\u{20FF}')
}

/// Latin-1 and Latin Extended-A letters reduced to their base letter.
fn strip_diacritic(ch: char) -> char {
    let upper = ch.is_uppercase();
    let base = match ch {
        '\u{00C0}'..='\u{00C5}' | '\u{00E0}'..='\u{00E5}' | '\u{0100}'..='\u{0105}' => 'a',
        '\u{00C7}' | '\u{00E7}' | '\u{0106}'..='\u{010D}' => 'c',
        '\u{010E}'..='\u{0111}' => 'd',
        '\u{00C8}'..='\u{00CB}' | '\u{00E8}'..='\u{00EB}' | '\u{0112}'..='\u{011B}' => 'e',
        '\u{011C}'..='\u{0123}' => 'g',
        '\u{0124}'..='\u{0127}' => 'h',
        '\u{00CC}'..='\u{00CF}' | '\u{00EC}'..='\u{00EF}' | '\u{0128}'..='\u{0131}' => 'i',
        '\u{0134}' | '\u{0135}' => 'j',
        '\u{0136}' | '\u{0137}' => 'k',
        '\u{0139}'..='\u{0142}' => 'l',
        '\u{00D1}' | '\u{00F1}' | '\u{0143}'..='\u{0148}' => 'n',
        '\u{00D2}'..='\u{00D6}' | '\u{00F2}'..='\u{00F6}' | '\u{00D8}' | '\u{00F8}' => 'o',
        '\u{014C}'..='\u{0151}' => 'o',
        '\u{0154}'..='\u{0159}' => 'r',
        '\u{015A}'..='\u{0161}' => 's',
        '\u{0162}'..='\u{0167}' => 't',
        '\u{00D9}'..='\u{00DC}' | '\u{00F9}'..='\u{00FC}' | '\u{0168}'..='\u{0173}' => 'u',
        '\u{0174}' | '\u{0175}' => 'w',
        '\u{00DD}' | '\u{00FD}' | '\u{00FF}' | '\u{0176}'..='\u{0178}' => 'y',
        '\u{0179}'..='\u{017E}' => 'z',
        _ => return ch,
    };
    if upper { base.to_ascii_uppercase() } else { base }
}

/// Compare folded text, treating each run of ASCII digits as one number.
fn compare_numeric(a: &[char], b: &[char]) -> Ordering {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let run_a = digit_run(&a[i..]);
            let run_b = digit_run(&b[j..]);
            let ordering = compare_digits(&a[i..i + run_a], &b[j..j + run_b]);
            if ordering != Ordering::Equal {
                return ordering;
            }
            i += run_a;
            j += run_b;
        } else {
            match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                ordering => return ordering,
            }
        }
    }
    (a.len() - i).cmp(&(b.len() - j))
}

fn digit_run(text: &[char]) -> usize {
    text.iter().take_while(|ch| ch.is_ascii_digit()).count()
}

fn compare_digits(a: &[char], b: &[char]) -> Ordering {
    let trim = |digits: &[char]| -> usize { digits.iter().take_while(|&&d| d == '0').count() };
    let a = &a[trim(a)..];
    let b = &b[trim(b)..];
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Text representation the engine hands to a collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextRepresentation {
    Utf8,
    Utf16Be,
    Utf16Le,
    Utf16Native,
}

impl TextRepresentation {
    pub fn from_engine(rep: c_int) -> Self {
        match rep {
            ffi::SQLITE_UTF8 => TextRepresentation::Utf8,
            ffi::SQLITE_UTF16BE => TextRepresentation::Utf16Be,
            ffi::SQLITE_UTF16LE => TextRepresentation::Utf16Le,
            _ => TextRepresentation::Utf16Native,
        }
    }

    /// Decode one operand; `None` when the bytes are not valid text.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        let unit: fn([u8; 2]) -> u16 = match self {
            TextRepresentation::Utf8 => {
                return std::str::from_utf8(bytes).ok().map(str::to_string);
            }
            TextRepresentation::Utf16Be => u16::from_be_bytes,
            TextRepresentation::Utf16Le => u16::from_le_bytes,
            TextRepresentation::Utf16Native => u16::from_ne_bytes,
        };
        if bytes.len() % 2 != 0 {
            return None;
        }
        let units = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
        char::decode_utf16(units).collect::<Result<String, _>>().ok()
    }
}

/// State owned by one registered collation.
struct CollationContext {
    encoding: TextRepresentation,
    options: CompareOptions,
}

impl CollationContext {
    fn compare(&self, a: &[u8], b: &[u8]) -> c_int {
        let Some(a) = self.encoding.decode(a) else {
            return 0;
        };
        let Some(b) = self.encoding.decode(b) else {
            return 1;
        };
        match self.options.compare(&a, &b) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }
}

/// Arrange for unknown collation names to be resolved on demand.
pub(crate) fn install(db: *mut ffi::sqlite3) -> c_int {
    unsafe { ffi::sqlite3_collation_needed(db, std::ptr::null_mut(), Some(collation_needed)) }
}

/// Register a collation under `name` for the text representation `rep`.
pub(crate) fn register(db: *mut ffi::sqlite3, name: &CStr, rep: c_int) -> c_int {
    let lowered = name.to_string_lossy().to_lowercase();
    let context = Box::new(CollationContext {
        encoding: TextRepresentation::from_engine(rep),
        options: CompareOptions::from_collation_name(&lowered),
    });
    debug!(collation = %lowered, options = ?context.options, "registering collation");

    let context = Box::into_raw(context);
    let code = unsafe {
        ffi::sqlite3_create_collation_v2(
            db,
            name.as_ptr(),
            rep,
            context.cast(),
            Some(compare_callback),
            Some(destroy_callback),
        )
    };
    if code != ffi::SQLITE_OK {
        // the destroy callback is not invoked when registration fails
        drop(unsafe { Box::from_raw(context) });
        warn!(collation = %lowered, code, "failed to register collation");
    }
    code
}

unsafe extern "C" fn collation_needed(
    _arg: *mut c_void,
    db: *mut ffi::sqlite3,
    rep: c_int,
    name: *const c_char,
) {
    if name.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let name = unsafe { CStr::from_ptr(name) };
        register(db, name, rep);
    }));
}

unsafe extern "C" fn compare_callback(
    arg: *mut c_void,
    a_len: c_int,
    a: *const c_void,
    b_len: c_int,
    b: *const c_void,
) -> c_int {
    catch_unwind(AssertUnwindSafe(|| {
        let context = unsafe { &*(arg as *const CollationContext) };
        let a = unsafe { operand(a, a_len) };
        let b = unsafe { operand(b, b_len) };
        context.compare(a, b)
    }))
    .unwrap_or(0)
}

unsafe extern "C" fn destroy_callback(arg: *mut c_void) {
    if !arg.is_null() {
        drop(unsafe { Box::from_raw(arg as *mut CollationContext) });
    }
}

unsafe fn operand<'a>(data: *const c_void, len: c_int) -> &'a [u8] {
    if data.is_null() || len <= 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data.cast::<u8>(), len as usize) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static RELEASED: Cell<usize> = const { Cell::new(0) };
    }

    impl Drop for CollationContext {
        fn drop(&mut self) {
            RELEASED.with(|count| count.set(count.get() + 1));
        }
    }

    fn released() -> usize {
        RELEASED.with(Cell::get)
    }

    fn sorted(collation: &str, words: &[&str]) -> Vec<String> {
        let options = CompareOptions::from_collation_name(collation);
        let mut words: Vec<String> = words.iter().map(|w| w.to_string()).collect();
        words.sort_by(|a, b| options.compare(a, b));
        words
    }

    #[test]
    fn test_options_from_keywords() {
        let natural = CompareOptions::from_collation_name("Natural");
        assert!(natural.case_insensitive && natural.diacritic_insensitive && natural.width_insensitive);
        assert!(natural.numeric);

        let default = CompareOptions::from_collation_name("anything");
        assert!(default.case_insensitive && default.diacritic_insensitive);
        assert!(!default.width_insensitive && !default.numeric);

        let strict = CompareOptions::from_collation_name("strict numeric");
        assert!(!strict.case_insensitive && !strict.diacritic_insensitive);
        assert!(strict.numeric);

        let case = CompareOptions::from_collation_name("case");
        assert!(!case.case_insensitive);
        assert!(case.diacritic_insensitive && case.width_insensitive);

        let literal = CompareOptions::from_collation_name("literal equivalent");
        assert!(literal.literal && !literal.case_insensitive);

        let combined = CompareOptions::from_collation_name("alphabet glyph backword ordered");
        assert!(combined.case_insensitive && combined.width_insensitive);
        assert!(!combined.diacritic_insensitive);
        assert!(combined.backwards && combined.forced_ordering);
    }

    #[test]
    fn test_natural_ordering() {
        assert_eq!(
            sorted("natural", &["åbc123", "ABC99", "ABÇ77", "abc88"]),
            vec!["ABÇ77", "abc88", "ABC99", "åbc123"]
        );
    }

    #[test]
    fn test_insensitive_equality() {
        let options = CompareOptions::from_collation_name("equivalent");
        assert_eq!(options.compare("Éclair", "eclair"), Ordering::Equal);
        assert_eq!(options.compare("ＡＢＣ", "abc"), Ordering::Equal);
        assert_eq!(options.compare("e\u{0301}", "E"), Ordering::Equal);

        let mark = CompareOptions::from_collation_name("mark");
        assert_ne!(mark.compare("é", "e"), Ordering::Equal);
        assert_eq!(mark.compare("É", "é"), Ordering::Equal);
    }

    #[test]
    fn test_ordered_breaks_ties_and_backwards_reverses() {
        let options = CompareOptions::from_collation_name("alphabet ordered");
        assert_eq!(options.compare("B", "b"), Ordering::Less);
        let options = CompareOptions::from_collation_name("alphabet backword");
        assert_eq!(options.compare("a", "b"), Ordering::Greater);
    }

    #[test]
    fn test_numeric_digit_runs() {
        let options = CompareOptions::from_collation_name("strict numeric");
        assert_eq!(options.compare("file9", "file10"), Ordering::Less);
        assert_eq!(options.compare("file010", "file10"), Ordering::Equal);
        assert_eq!(options.compare("v2.10", "v2.9"), Ordering::Greater);
        assert_eq!(options.compare("a", "a1"), Ordering::Less);
    }

    #[test]
    fn test_decode_representations() {
        let units: Vec<u16> = "hé".encode_utf16().collect();
        let be: Vec<u8> = units.iter().flat_map(|u| u.to_be_bytes()).collect();
        let le: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(TextRepresentation::Utf16Be.decode(&be).as_deref(), Some("hé"));
        assert_eq!(TextRepresentation::Utf16Le.decode(&le).as_deref(), Some("hé"));
        assert_eq!(TextRepresentation::Utf8.decode("hé".as_bytes()).as_deref(), Some("hé"));
        assert_eq!(TextRepresentation::Utf8.decode(&[0xff]), None);
        assert_eq!(TextRepresentation::Utf16Le.decode(&[0x00]), None);
        assert_eq!(TextRepresentation::from_engine(ffi::SQLITE_UTF16LE), TextRepresentation::Utf16Le);
    }

    #[test]
    fn test_undecodable_operands() {
        let context = CollationContext {
            encoding: TextRepresentation::Utf8,
            options: CompareOptions::default(),
        };
        assert_eq!(context.compare(&[0xff], b"a"), 0);
        assert_eq!(context.compare(b"a", &[0xff]), 1);
        assert_eq!(context.compare(b"a", b"b"), -1);
    }

    #[test]
    fn test_context_released_once_per_registration() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let db = unsafe { conn.handle() };
        let before = released();

        assert_eq!(register(db, c"natural", ffi::SQLITE_UTF8), ffi::SQLITE_OK);
        assert_eq!(released(), before);

        // replacing the collation releases the previous context
        assert_eq!(register(db, c"natural", ffi::SQLITE_UTF8), ffi::SQLITE_OK);
        assert_eq!(released(), before + 1);

        assert_eq!(register(db, c"literal", ffi::SQLITE_UTF16LE), ffi::SQLITE_OK);
        assert_eq!(released(), before + 1);

        drop(conn);
        assert_eq!(released(), before + 3);
    }

    #[test]
    fn test_failed_registration_releases_context() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let db = unsafe { conn.handle() };
        let before = released();

        assert_eq!(register(db, c"natural", 99), ffi::SQLITE_MISUSE);
        assert_eq!(released(), before + 1);

        drop(conn);
        assert_eq!(released(), before + 1);
    }

    #[test]
    fn test_collation_needed_context_released_on_close() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let db = unsafe { conn.handle() };
        assert_eq!(install(db), ffi::SQLITE_OK);
        let before = released();

        conn.execute_batch("create table w ( t text ); insert into w values ( 'b' ), ( 'A' );")
            .unwrap();
        let mut stmt = conn.prepare("select t from w order by t collate 'alphabet'").unwrap();
        let words: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(words, ["A", "b"]);
        drop(stmt);
        assert_eq!(released(), before);

        drop(conn);
        assert_eq!(released(), before + 1);
    }
}
