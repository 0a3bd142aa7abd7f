#![crate_type = "cdylib"]
#![crate_type = "lib"]

use fxhash::FxHashMap as HashMap;
use lazy_static::lazy_static;
use smallvec::{smallvec, SmallVec};
use static_assertions::const_assert;
use std::borrow::Cow;
use std::convert::TryFrom;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::{fmt, fs, io, time};

#[cfg(target_arch = "wasm32")]
mod js;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("combination {combination} is missing from the source mapping{}", branch_of(.pattern))]
    MissingCombination {
        combination: Choices,
        pattern: Option<Choices>,
    },
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn branch_of(pattern: &Option<Choices>) -> String {
    match pattern {
        Some(pattern) => format!(" (branch of pattern {})", pattern),
        None => String::new(),
    }
}

impl Error {
    fn at_line(self, line: usize) -> Self {
        match self {
            Error::MalformedInput(message) => {
                Error::MalformedInput(format!("line {}: {}", line, message))
            }
            other => other,
        }
    }

    fn in_pattern(self, pattern: Choices) -> Self {
        match self {
            Error::MissingCombination {
                combination,
                pattern: None,
            } => Error::MissingCombination {
                combination,
                pattern: Some(pattern),
            },
            other => other,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            Error::InvalidArgument(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err.to_string())
            }
            _ => io::Error::new(io::ErrorKind::InvalidData, err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fn malformed_at(line: usize, message: impl Into<String>) -> Error {
    Error::MalformedInput(message.into()).at_line(line)
}

lazy_static! {
    static ref REFERENCE_INSTANT: time::Instant = time::Instant::now();
}

#[cfg(not(target_arch = "wasm32"))]
fn now() -> f64 {
    let reference = *REFERENCE_INSTANT; // This must run first!
    time::Instant::now().duration_since(reference).as_secs_f64()
}

#[cfg(target_arch = "wasm32")]
fn now() -> f64 {
    js::now() / 1e3
}

pub const NUM_CHOICES: usize = 5;

/// A single quiz choice. Digit 0 stands for "any of the concrete choices".
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Choice(u8);

impl Choice {
    pub const WILDCARD: Self = Choice(0);
    pub const COUNT: usize = 4;
    pub const RADIX: usize = Self::COUNT + 1;

    /// The concrete choice assigned to the `i`-th copy of a branch.
    fn concrete(i: usize) -> Self {
        Choice((i % Self::COUNT) as u8 + 1)
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<char> for Choice {
    type Error = Error;
    fn try_from(c: char) -> Result<Self> {
        let digit = c.to_digit(10).ok_or_else(|| {
            Error::MalformedInput(format!("choice must be a decimal digit, got {:?}", c))
        })?;
        Ok(Choice(digit as u8))
    }
}

pub const NUM_COMBINATIONS: usize = usize::pow(Choice::COUNT, NUM_CHOICES as u32);
pub const NUM_CHOICE_STRINGS: usize = usize::pow(Choice::RADIX, NUM_CHOICES as u32);
pub const NUM_PATTERNS: usize = NUM_CHOICE_STRINGS - NUM_COMBINATIONS;

const_assert!(NUM_COMBINATIONS == 1024);
const_assert!(NUM_CHOICE_STRINGS == 3125);
const_assert!(NUM_PATTERNS == 2101);
const_assert!(NUM_CHOICE_STRINGS <= i64::MAX as usize);

/// Either a combination (no wildcards) or a pattern (at least one wildcard).
///
/// The derived ordering agrees with the numeric order of the choices read as
/// a base-5 number, which is the order patterns are enumerated in.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Choices([Choice; NUM_CHOICES]);

impl fmt::Debug for Choices {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Choices::try_from({:?}).unwrap()", format!("{}", self))
    }
}

impl fmt::Display for Choices {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for c in &self.0 {
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl TryFrom<&str> for Choices {
    type Error = Error;
    fn try_from(s: &str) -> Result<Self> {
        if s.chars().count() != NUM_CHOICES {
            return Err(Error::MalformedInput(format!(
                "choices must have {} characters, got {:?}",
                NUM_CHOICES, s
            )));
        }
        let mut choices = [Choice::WILDCARD; NUM_CHOICES];
        for (c, r) in s.chars().zip(&mut choices) {
            *r = Choice::try_from(c)?;
        }
        Ok(Self(choices))
    }
}

pub type Branches = SmallVec<[Choices; Choice::COUNT]>;

/// Repeats every branch twice, in place.
fn double_list(branches: &mut Branches) {
    *branches = branches.iter().flat_map(|&branch| [branch, branch]).collect();
}

impl Choices {
    pub fn choices(&self) -> &[Choice; NUM_CHOICES] {
        &self.0
    }

    pub fn wildcards(&self) -> usize {
        self.0.iter().filter(|&&c| c == Choice::WILDCARD).count()
    }

    pub fn is_combination(&self) -> bool {
        self.wildcards() == 0
    }

    /// Every combination reachable by resolving the wildcards.
    ///
    /// Each wildcard quadruples the branch list (two doublings) and then the
    /// `i`-th branch takes choice `i % 4 + 1` at that position. This yields
    /// `4^k` branches for `k` wildcards, ordered lexicographically over the
    /// wildcard positions. A combination is its own single branch.
    pub fn branches(&self) -> Branches {
        let mut branches: Branches = smallvec![*self];
        for (position, &choice) in self.0.iter().enumerate() {
            if choice != Choice::WILDCARD {
                continue;
            }
            double_list(&mut branches);
            double_list(&mut branches);
            for (i, branch) in branches.iter_mut().enumerate() {
                branch.0[position] = Choice::concrete(i);
            }
        }
        branches
    }
}

const DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Renders `n` in the given base (2 to 16) without leading zeros.
pub fn change_base(n: i64, base: u32) -> Result<String> {
    if n < 0 {
        return Err(Error::InvalidArgument(format!(
            "n must be non-negative, got {}",
            n
        )));
    }
    if !(2..=16).contains(&base) {
        return Err(Error::InvalidArgument(format!(
            "base must be between 2 and 16, got {}",
            base
        )));
    }
    Ok(digits_in_base(n as u64, base as u64))
}

fn digits_in_base(n: u64, base: u64) -> String {
    let digit = char::from(DIGITS[(n % base) as usize]);
    if n < base {
        return digit.to_string();
    }
    let mut digits = digits_in_base(n / base, base);
    digits.push(digit);
    digits
}

pub fn zero_pad(digits: &str, width: usize) -> String {
    format!("{:0>width$}", digits, width = width)
}

/// All choice strings of length 5 over 0..=4, in increasing base-5 order.
pub fn all_choices() -> Result<Vec<Choices>> {
    (0..NUM_CHOICE_STRINGS as i64)
        .map(|n| {
            let digits = change_base(n, Choice::RADIX as u32)?;
            Choices::try_from(zero_pad(&digits, NUM_CHOICES).as_str())
        })
        .collect()
}

/// The choice strings containing at least one wildcard, in enumeration order.
pub fn all_patterns() -> Result<Vec<Choices>> {
    Ok(all_choices()?
        .into_iter()
        .filter(|choices| !choices.is_combination())
        .collect())
}

/// Returns the first result if every result is equal to it.
pub fn guaranteed<T: PartialEq>(results: impl IntoIterator<Item = T>) -> Option<T> {
    let mut results = results.into_iter();
    let first = results.next()?;
    if results.all(|result| result == first) {
        Some(first)
    } else {
        None
    }
}

/// Splits comma-separated text into records, each tagged with the physical
/// line it starts on. A quoted field may continue over several lines.
fn split_records(s: &str) -> Result<Vec<(usize, Vec<String>)>> {
    let mut records = Vec::default();
    let mut fields = Vec::default();
    let mut field = String::new();
    let mut quoted = false;
    let mut start = 1;
    for (i, line) in s.lines().enumerate() {
        if quoted {
            field.push('\n');
        } else if line.trim().is_empty() {
            continue;
        } else {
            start = i + 1;
        }
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' if quoted => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        quoted = false;
                    }
                }
                '"' if field.is_empty() => quoted = true,
                ',' if !quoted => fields.push(std::mem::take(&mut field)),
                c => field.push(c),
            }
        }
        if !quoted {
            fields.push(std::mem::take(&mut field));
            records.push((start, std::mem::take(&mut fields)));
        }
    }
    if quoted {
        return Err(malformed_at(start, "unterminated quoted field"));
    }
    Ok(records)
}

fn quote_field(field: &str) -> Cow<'_, str> {
    if field.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

const LINE_TERMINATOR: &str = "\r\n";

/// Outcome of every fully-resolved combination.
#[derive(Clone, Debug, Default)]
pub struct SourceMapping {
    results: HashMap<Choices, String>,
}

impl FromIterator<(Choices, String)> for SourceMapping {
    fn from_iter<T: IntoIterator<Item = (Choices, String)>>(iter: T) -> Self {
        let mut mapping = Self::default();
        for (choices, result) in iter {
            mapping.insert(choices, result);
        }
        mapping
    }
}

impl SourceMapping {
    pub const CHOICES_COLUMN: &'static str = "Choices";
    pub const RESULT_COLUMN: &'static str = "Result";

    /// Later entries for the same choices replace earlier ones.
    pub fn insert(&mut self, choices: Choices, result: String) -> Option<String> {
        self.results.insert(choices, result)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Parses a comma-separated table with a header naming at least the
    /// `Choices` and `Result` columns.
    pub fn parse(s: &str) -> Result<Self> {
        let mut records = split_records(s.trim_start_matches('\u{feff}'))?.into_iter();
        let (header_line, header) = records
            .next()
            .ok_or_else(|| Error::MalformedInput("missing header row".into()))?;
        let column = |name: &str| {
            header
                .iter()
                .position(|field| field == name)
                .ok_or_else(|| malformed_at(header_line, format!("missing column {:?}", name)))
        };
        let choices_column = column(Self::CHOICES_COLUMN)?;
        let result_column = column(Self::RESULT_COLUMN)?;

        let mut mapping = Self::default();
        for (line, mut fields) in records {
            if fields.len() <= choices_column.max(result_column) {
                return Err(malformed_at(
                    line,
                    format!("expected {} fields, got {}", header.len(), fields.len()),
                ));
            }
            let choices = Choices::try_from(fields[choices_column].as_str())
                .map_err(|err| err.at_line(line))?;
            mapping.insert(choices, std::mem::take(&mut fields[result_column]));
        }
        Ok(mapping)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn resolve(&self, combination: Choices) -> Result<&str> {
        self.results
            .get(&combination)
            .map(String::as_str)
            .ok_or(Error::MissingCombination {
                combination,
                pattern: None,
            })
    }

    /// The result shared by every branch of `choices`, if there is one.
    pub fn guaranteed_result(&self, choices: Choices) -> Result<Option<&str>> {
        let results = choices
            .branches()
            .into_iter()
            .map(|branch| self.resolve(branch))
            .collect::<Result<Vec<&str>>>()
            .map_err(|err| err.in_pattern(choices))?;
        Ok(guaranteed(results))
    }
}

/// Removes the file on drop unless it has been renamed into place.
struct StagingFile {
    path: PathBuf,
    keep: bool,
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Guaranteed result of every pattern, in enumeration order.
#[derive(Clone, Debug, Default)]
pub struct GuaranteeTable {
    rows: Vec<(Choices, Option<String>)>,
}

impl GuaranteeTable {
    pub const HEADER: [&'static str; 2] = ["Choices", "Guaranteed Result"];

    pub fn build(source: &SourceMapping, progress_sink: &mut ProgressSink) -> Result<Self> {
        let patterns = all_patterns()?;
        let mut rows = Vec::with_capacity(patterns.len());
        let mut progress_tracker = ProgressTracker::new(progress_sink);
        for (i, &pattern) in patterns.iter().enumerate() {
            progress_tracker.tick(&mut || {
                (i as f64 / patterns.len() as f64, format!("{}", pattern))
            });
            let result = source.guaranteed_result(pattern)?;
            rows.push((pattern, result.map(str::to_owned)));
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[(Choices, Option<String>)] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `None` if the pattern is not in the table, `Some(None)` if it has no
    /// guaranteed result.
    pub fn get(&self, pattern: Choices) -> Option<Option<&str>> {
        let i = self
            .rows
            .binary_search_by_key(&pattern, |&(choices, _)| choices)
            .ok()?;
        Some(self.rows[i].1.as_deref())
    }

    pub fn num_guaranteed(&self) -> usize {
        self.rows.iter().filter(|(_, result)| result.is_some()).count()
    }

    pub fn write_csv(&self, sink: &mut dyn Write) -> io::Result<()> {
        write!(sink, "{}{}", Self::HEADER.join(","), LINE_TERMINATOR)?;
        for (choices, result) in &self.rows {
            write!(
                sink,
                "{},{}{}",
                choices,
                quote_field(result.as_deref().unwrap_or_default()),
                LINE_TERMINATOR,
            )?;
        }
        Ok(())
    }

    /// Writes next to `path` first and renames into place, so `path` only
    /// ever holds a complete table.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut staging = OsString::from(path.as_os_str());
        staging.push(".partial");
        let mut staging = StagingFile {
            path: PathBuf::from(staging),
            keep: false,
        };
        {
            let mut out_file = io::BufWriter::new(fs::File::create(&staging.path)?);
            self.write_csv(&mut out_file)?;
            out_file.flush()?;
        }
        fs::rename(&staging.path, path)?;
        staging.keep = true;
        Ok(())
    }

    pub fn log_summary(&self, log: &dyn Log) {
        let mut counts = [(0usize, 0usize); NUM_CHOICES + 1];
        for (choices, result) in &self.rows {
            let (total, hits) = &mut counts[choices.wildcards()];
            *total += 1;
            *hits += result.is_some() as usize;
        }
        log.log(&format!(
            "{} of {} patterns have a guaranteed result",
            self.num_guaranteed(),
            self.len(),
        ));
        log.log("wildcards\tguaranteed");
        for (k, &(total, hits)) in counts.iter().enumerate().skip(1) {
            log.log(&format!(
                "\t{}\t{:4} / {:4}\t{:5.1}%",
                k,
                hits,
                total,
                hits as f64 / total as f64 * 100.0,
            ));
        }
    }
}

pub const DEFAULT_INPUT_PATH: &str = "LogHoloEnRpgPersonalityQuizCombinations.csv";
pub const DEFAULT_OUTPUT_PATH: &str = "holoEN_RPG_personality_quiz_data_subcombinations.csv";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Table of every combination and its result.
    pub input_path: PathBuf,
    /// Where the guarantee table is written.
    pub output_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: DEFAULT_INPUT_PATH.into(),
            output_path: DEFAULT_OUTPUT_PATH.into(),
        }
    }
}

/// Loads the source table, computes every guarantee and saves the result.
/// Nothing is written unless the whole table was computed.
pub fn run(config: &Config, log: &dyn Log) -> Result<GuaranteeTable> {
    let t0 = now();
    let source = SourceMapping::load(&config.input_path)?;
    log.log(&format!(
        "loaded {} combinations from {}",
        source.len(),
        config.input_path.display(),
    ));
    let table = GuaranteeTable::build(&source, &mut |progress, message| {
        log.log(&format!("\x1b[2K\r{:6.2}%\t{}", progress * 100.0, message));
    })?;
    log.log("\x1b[2K\r");
    table.save(&config.output_path)?;
    log.log(&format!(
        "wrote {} patterns to {} in {}",
        table.len(),
        config.output_path.display(),
        render_duration_secs(now() - t0),
    ));
    table.log_summary(log);
    Ok(table)
}

fn render_duration_secs(secs: f64) -> String {
    if !secs.is_finite() {
        format!("??")
    } else if secs >= 3600.0 {
        format!("{:.0}h", secs / 3600.0)
    } else if secs >= 60.0 {
        format!("{:.0}min", secs / 60.0)
    } else if secs >= 1.0 {
        format!("{:.0}s", secs)
    } else {
        format!("{:.0}ms", secs * 1e3)
    }
}

pub type ProgressSink<'a> = dyn FnMut(f64, String) + 'a;

struct ProgressTracker<'a, 'b> {
    progress_sink: &'a mut ProgressSink<'b>,
    ticks_before_render: u32,
    ticks_total: u64,
    render_frequency: u32,
    t_start: f64,
}

impl<'a, 'b> ProgressTracker<'a, 'b> {
    const RENDER_INTERVAL: time::Duration = time::Duration::from_millis(50);

    fn new(progress_sink: &'a mut ProgressSink<'b>) -> Self {
        Self {
            progress_sink,
            ticks_before_render: 1,
            ticks_total: 1,
            render_frequency: 1,
            t_start: now(),
        }
    }

    fn tick(&mut self, query_progress: &mut dyn FnMut() -> (f64, String)) {
        self.ticks_before_render -= 1;
        if self.ticks_before_render != 0 {
            return;
        }
        let (progress, message) = query_progress();
        let elapsed = now() - self.t_start;
        let remaining = elapsed * (1.0 - progress) / progress;
        self.render_frequency = ((Self::RENDER_INTERVAL.as_secs_f64() / elapsed
            * self.ticks_total as f64) as u32)
            .clamp(self.render_frequency / 2, self.render_frequency * 2)
            .clamp(1, 1000000);
        self.ticks_before_render = self.render_frequency;
        self.ticks_total += self.render_frequency as u64;
        (self.progress_sink)(
            progress,
            format!(
                "{} elapsed | {} left | pattern {}",
                render_duration_secs(elapsed),
                render_duration_secs(remaining),
                message,
            ),
        );
    }
}

pub trait Log {
    fn log(&self, message: &str);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StderrLog;

impl Log for StderrLog {
    fn log(&self, message: &str) {
        if message.starts_with("\x1b[2K\r") {
            eprint!("{}", message);
            let _ = io::stderr().flush();
        } else {
            eprintln!("{}", message);
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn solve(combinations: &str) -> Result<()> {
    if combinations.trim().is_empty() {
        return Err(Error::MalformedInput(
            "Please upload the combinations table first.".into(),
        ));
    }
    let source = SourceMapping::parse(combinations)?;
    js::update_progress(format!("(0/1) Computing guarantees..."), 0.0);
    let table = {
        let _timer = js::Timer::from("guarantees");
        GuaranteeTable::build(&source, &mut |progress, message| {
            js::update_progress(format!("(0/1) Computing guarantees... {}", message), progress);
        })?
    };
    js::Reply::SetGuarantees {
        rows: table
            .rows()
            .iter()
            .map(|(choices, result)| (choices.to_string(), result.clone().unwrap_or_default()))
            .collect(),
    }
    .post();
    js::update_status(format!(
        "(1/1) Done! {} of {} patterns have a guaranteed result.",
        table.num_guaranteed(),
        table.len(),
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn choices(s: &str) -> Choices {
        Choices::try_from(s).unwrap()
    }

    fn all_combinations() -> Vec<Choices> {
        all_choices()
            .unwrap()
            .into_iter()
            .filter(Choices::is_combination)
            .collect()
    }

    fn uniform_source(result: &str) -> SourceMapping {
        all_combinations()
            .into_iter()
            .map(|combination| (combination, result.to_owned()))
            .collect()
    }

    fn build(source: &SourceMapping) -> Result<GuaranteeTable> {
        GuaranteeTable::build(source, &mut |_, _| {})
    }

    #[test]
    fn change_base_values() {
        for (n, base, digits) in [
            (0, 2, "0"),
            (10, 2, "1010"),
            (255, 16, "FF"),
            (3124, 5, "44444"),
            (5, 5, "10"),
            (35, 16, "23"),
        ] {
            assert_eq!(change_base(n, base).unwrap(), digits, "{} {}", n, base);
        }
        for base in 2..=16 {
            assert_eq!(change_base(0, base).unwrap(), "0");
        }
    }

    #[test]
    fn change_base_round_trip() {
        for n in 0..NUM_CHOICE_STRINGS as i64 {
            let padded = zero_pad(&change_base(n, 5).unwrap(), NUM_CHOICES);
            assert_eq!(padded.len(), NUM_CHOICES);
            assert_eq!(i64::from_str_radix(&padded, 5).unwrap(), n);
        }
    }

    #[test]
    fn change_base_invalid_argument() {
        for (n, base) in [(-1, 5), (5, 1), (5, 0), (5, 17)] {
            assert!(
                matches!(change_base(n, base), Err(Error::InvalidArgument(_))),
                "{} {}",
                n,
                base,
            );
        }
    }

    #[test]
    fn choices_string() {
        for s in ["00000", "11111", "41410", "44440", "12034"] {
            assert_eq!(format!("{}", choices(s)), s);
        }
        for s in ["", "1111", "111111", "1a111", "11 11", "-1111"] {
            assert!(
                matches!(Choices::try_from(s), Err(Error::MalformedInput(_))),
                "{:?}",
                s,
            );
        }
        assert_eq!(choices("10203").wildcards(), 2);
        assert!(choices("12341").is_combination());
    }

    #[test]
    fn patterns_enumeration() {
        let patterns = all_patterns().unwrap();
        assert_eq!(patterns.len(), NUM_PATTERNS);
        assert_eq!(patterns[0], choices("00000"));
        assert_eq!(patterns[1], choices("00001"));
        assert_eq!(*patterns.last().unwrap(), choices("44440"));
        assert!(patterns.windows(2).all(|w| w[0] < w[1]));
        assert!(patterns.iter().all(|p| p.wildcards() >= 1));
        assert!(patterns.iter().all(|p| p.choices().iter().all(|c| c.0 <= 4)));
        assert!(!patterns.contains(&choices("11111")));

        let mut everything: HashSet<Choices> = patterns.into_iter().collect();
        everything.extend(all_combinations());
        assert_eq!(everything.len(), NUM_CHOICE_STRINGS);
    }

    #[test]
    fn branches_order() {
        let branches: Vec<String> = choices("41410")
            .branches()
            .iter()
            .map(|b| b.to_string())
            .collect();
        assert_eq!(branches, ["41411", "41412", "41413", "41414"]);

        assert_eq!(choices("11111").branches().as_slice(), [choices("11111")]);

        let mut expected = Vec::default();
        for a in 1..=4 {
            for b in 1..=4 {
                expected.push(format!("{}2{}33", a, b));
            }
        }
        let branches: Vec<String> = choices("02033")
            .branches()
            .iter()
            .map(|b| b.to_string())
            .collect();
        assert_eq!(branches, expected);
    }

    #[test]
    fn branches_cover_every_resolution() {
        for pattern in all_patterns().unwrap() {
            let k = pattern.wildcards();
            let branches = pattern.branches();
            assert_eq!(branches.len(), usize::pow(Choice::COUNT, k as u32), "{}", pattern);
            for branch in &branches {
                assert!(branch.is_combination(), "{} -> {}", pattern, branch);
                for (&p, &b) in pattern.choices().iter().zip(branch.choices()) {
                    assert!(p == Choice::WILDCARD || p == b, "{} -> {}", pattern, branch);
                }
            }
            let distinct: HashSet<Choices> = branches.into_iter().collect();
            assert_eq!(distinct.len(), usize::pow(Choice::COUNT, k as u32));
        }
        assert_eq!(choices("00000").branches().len(), NUM_COMBINATIONS);
    }

    #[test]
    fn guaranteed_reduction() {
        assert_eq!(guaranteed(["x"]), Some("x"));
        assert_eq!(guaranteed(["x", "x", "x"]), Some("x"));
        assert_eq!(guaranteed(["x", "y"]), None);
        for results in [["A", "A", "B"], ["A", "B", "A"], ["B", "A", "A"]] {
            assert_eq!(guaranteed(results), None, "{:?}", results);
        }
        assert_eq!(guaranteed(Vec::<&str>::new()), None);
    }

    #[test]
    fn parse_source_mapping() {
        let source = SourceMapping::parse(
            "\u{feff}Result,Choices,Notes\n\
             Ame,11111,first\n\
             \"Gura, Shark\",11112,\n\
             \n\
             \"Ina \"\"Tako\"\"\",11113,x\r\n\
             Kiara,11111,overwrites\n\
             \"Line one\nline two\",11114,\"spans\n\n\nlines\"\n",
        )
        .unwrap();
        assert_eq!(source.len(), 4);
        assert_eq!(source.resolve(choices("11114")).unwrap(), "Line one\nline two");
        assert_eq!(source.resolve(choices("11111")).unwrap(), "Kiara");
        assert_eq!(source.resolve(choices("11112")).unwrap(), "Gura, Shark");
        assert_eq!(source.resolve(choices("11113")).unwrap(), "Ina \"Tako\"");
        assert!(matches!(
            source.resolve(choices("11121")),
            Err(Error::MissingCombination { pattern: None, .. })
        ));
    }

    #[test]
    fn parse_malformed_input() {
        for (input, needle) in [
            ("", "missing header"),
            ("Choices,Outcome\n11111,A\n", "missing column \"Result\""),
            ("Choices,Result\n11111,A\n1111,B\n", "line 3"),
            ("Choices,Result\n11111,A\n11a11,B\n", "line 3"),
            ("Choices,Result\n11111\n", "line 2"),
            ("Choices,Result\n11111,\"A\n", "line 2: unterminated"),
            ("Choices,Result\n11111,\"A\nB\"\n1111,C\n", "line 4"),
        ] {
            match SourceMapping::parse(input) {
                Err(Error::MalformedInput(message)) => {
                    assert!(message.contains(needle), "{:?}: {}", input, message)
                }
                other => panic!("{:?}: unexpected {:?}", input, other),
            }
        }
    }

    #[test]
    fn uniform_source_guarantees_everything() {
        let table = build(&uniform_source("A")).unwrap();
        assert_eq!(table.len(), NUM_PATTERNS);
        assert_eq!(table.num_guaranteed(), NUM_PATTERNS);
        assert!(table.rows().iter().all(|(_, r)| r.as_deref() == Some("A")));
    }

    #[test]
    fn single_divergent_combination() {
        let mut source = uniform_source("A");
        source.insert(choices("11112"), "B".to_owned());
        let table = build(&source).unwrap();
        for (pattern, expected) in [
            ("11110", Some(None)),
            ("00000", Some(None)),
            ("00002", Some(None)),
            ("11120", Some(Some("A"))),
            ("22220", Some(Some("A"))),
            ("01111", Some(Some("A"))),
            ("11111", None),
            ("11112", None),
        ] {
            assert_eq!(table.get(choices(pattern)), expected, "{}", pattern);
        }
        assert_eq!(
            source.guaranteed_result(choices("11112")).unwrap(),
            Some("B")
        );
    }

    #[test]
    fn missing_combination_aborts() {
        let source: SourceMapping = all_combinations()
            .into_iter()
            .filter(|&c| c != choices("44444"))
            .map(|c| (c, "A".to_owned()))
            .collect();
        assert_eq!(source.guaranteed_result(choices("11110")).unwrap(), Some("A"));
        for pattern in ["44440", "00004", "40404"] {
            match source.guaranteed_result(choices(pattern)) {
                Err(Error::MissingCombination {
                    combination,
                    pattern: Some(p),
                }) => {
                    assert_eq!(combination, choices("44444"));
                    assert_eq!(p, choices(pattern));
                }
                other => panic!("{}: unexpected {:?}", pattern, other),
            }
        }
        match build(&source) {
            Err(err @ Error::MissingCombination { .. }) => {
                let message = err.to_string();
                assert!(message.contains("44444"), "{}", message);
                assert!(message.contains("00000"), "{}", message);
            }
            other => panic!("unexpected {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn write_guarantee_table() {
        let mut source = uniform_source("Calli, Mori");
        source.insert(choices("44444"), "Ame".to_owned());
        let table = build(&source).unwrap();
        let mut out = Vec::default();
        table.write_csv(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), NUM_PATTERNS + 1);
        assert_eq!(lines[0], "Choices,Guaranteed Result");
        assert_eq!(lines[1], "00000,");
        assert_eq!(lines[2], "00001,\"Calli, Mori\"");
        assert_eq!(lines[NUM_PATTERNS], "44440,");
        assert!(out.ends_with("\r\n"));
    }

    #[test]
    fn save_and_run() {
        let dir = std::env::temp_dir().join(format!("quizguarantee-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let config = Config {
            input_path: dir.join("combinations.csv"),
            output_path: dir.join("subcombinations.csv"),
        };
        let mut input = String::from("Choices,Result\n");
        for combination in all_combinations() {
            let result = if combination.choices()[0] == Choice(1) { "A" } else { "B" };
            input.push_str(&format!("{},{}\n", combination, result));
        }
        fs::write(&config.input_path, input).unwrap();

        struct NullLog;
        impl Log for NullLog {
            fn log(&self, _: &str) {}
        }
        let table = run(&config, &NullLog).unwrap();
        assert_eq!(table.get(choices("10000")), Some(Some("A")));
        assert_eq!(table.get(choices("20000")), Some(Some("B")));
        assert_eq!(table.get(choices("01111")), Some(None));

        let written = fs::read_to_string(&config.output_path).unwrap();
        assert_eq!(written.lines().count(), NUM_PATTERNS + 1);
        assert!(written.contains("\r\n10000,A\r\n"));
        assert!(!dir.join("subcombinations.csv.partial").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failed_run_writes_nothing() {
        let dir = std::env::temp_dir().join(format!("quizguarantee-fail-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let config = Config {
            input_path: dir.join("combinations.csv"),
            output_path: dir.join("subcombinations.csv"),
        };
        fs::write(&config.input_path, "Choices,Result\n11111,A\n").unwrap();
        assert!(matches!(
            run(&config, &StderrLog),
            Err(Error::MissingCombination { .. })
        ));
        assert!(!config.output_path.exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failed_save_removes_staging_file() {
        let dir = std::env::temp_dir().join(format!("quizguarantee-save-{}", std::process::id()));
        let output = dir.join("subcombinations.csv");
        fs::create_dir_all(&output).unwrap();
        let table = build(&uniform_source("A")).unwrap();
        assert!(matches!(table.save(&output), Err(Error::Io(_))));
        assert!(!dir.join("subcombinations.csv.partial").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.input_path, PathBuf::from(DEFAULT_INPUT_PATH));
        assert_eq!(config.output_path, PathBuf::from(DEFAULT_OUTPUT_PATH));
    }
}
