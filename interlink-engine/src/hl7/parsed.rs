//! Lazy, memoised view over raw HL7 v2 bytes.
//!
//! The raw bytes are authoritative and never mutated. Structure is parsed on
//! the first field access: delimiters are read from the MSH segment,
//! segments are indexed by name with repetition order preserved, and every
//! resolved path is memoised. [`ParsedView::set_field`] is functional: it
//! returns new raw bytes and leaves the view untouched.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::OnceLock;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
use crate::error::EngineError;
use crate::hl7::path::FieldPath;

/// The five HL7 delimiters, discovered from MSH positions 3..7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

/// Parsed message structure, built once on first access.
#[derive(Debug)]
struct Parsed {
    segments: Vec<String>,
    /// Segment name -> indices into `segments`, in message order.
    segment_map: HashMap<String, Vec<usize>>,
    delimiters: Delimiters,
}

impl Parsed {
    fn build(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let normalized = text.replace("\r\n", "\r").replace('\n', "\r");

        let segments: Vec<String> = normalized
            .split('\r')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
            .collect();

        let mut delimiters = Delimiters::default();
        if let Some(msh) = segments.first() {
            if msh.starts_with("MSH") {
                let chars: Vec<char> = msh.chars().collect();
                if chars.len() >= 8 {
                    delimiters = Delimiters {
                        field: chars[3],
                        component: chars[4],
                        repetition: chars[5],
                        escape: chars[6],
                        subcomponent: chars[7],
                    };
                }
            }
        }

        let mut segment_map: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, seg) in segments.iter().enumerate() {
            if seg.len() >= 3 {
                segment_map.entry(seg[..3].to_string()).or_default().push(i);
            }
        }

        Self {
            segments,
            segment_map,
            delimiters,
        }
    }

    fn segment(&self, name: &str, rep: usize) -> Option<&str> {
        let idx = *self.segment_map.get(name)?.get(rep)?;
        self.segments.get(idx).map(String::as_str)
    }
}

/// Lazy handle over raw HL7 bytes with path-based field access.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::hl7::ParsedView;
///
/// let raw = b"MSH|^~\\&|SRC|F1|DST|F2|20240115120000||ADT^A01|MSG001|P|2.4\rPID|1||12345||DOE^JOHN\r";
/// let view = ParsedView::new(raw.to_vec());
///
/// assert_eq!(view.get_field("MSH-9.1").as_deref(), Some("ADT"));
/// assert_eq!(view.get_field("MSH-10").as_deref(), Some("MSG001"));
/// assert_eq!(view.get_field("PID-5.2").as_deref(), Some("JOHN"));
/// assert_eq!(view.message_type().as_deref(), Some("ADT_A01"));
/// ```
#[derive(Debug)]
pub struct ParsedView {
    raw: Vec<u8>,
    parsed: OnceLock<Parsed>,
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl ParsedView {
    /// Create a view; nothing is parsed until the first access.
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        Self {
            raw: raw.into(),
            parsed: OnceLock::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying raw bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Delimiters in effect for this message (parses on first call).
    pub fn delimiters(&self) -> Delimiters {
        self.parsed().delimiters
    }

    fn parsed(&self) -> &Parsed {
        self.parsed.get_or_init(|| Parsed::build(&self.raw))
    }

    /// Resolve a field path, memoising the result.
    ///
    /// Returns `None` for paths that do not resolve (missing segment, field
    /// out of range, empty value) and for malformed paths.
    pub fn get_field(&self, path: &str) -> Option<String> {
        if let Some(cached) = self.cache.lock().get(path) {
            return cached.clone();
        }

        let value = FieldPath::parse(path)
            .ok()
            .and_then(|p| self.resolve(&p));
        self.cache.lock().insert(path.to_string(), value.clone());
        value
    }

    /// Resolve a field path, substituting `default` when absent.
    pub fn get_field_or(&self, path: &str, default: &str) -> String {
        self.get_field(path).unwrap_or_else(|| default.to_string())
    }

    /// Get one segment by name and repetition index (0-based).
    pub fn get_segment(&self, name: &str, rep: usize) -> Option<String> {
        self.parsed().segment(name, rep).map(str::to_string)
    }

    /// Get all segments with the given name, in message order.
    pub fn get_segments(&self, name: &str) -> Vec<String> {
        let parsed = self.parsed();
        parsed
            .segment_map
            .get(name)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&i| parsed.segments.get(i).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn resolve(&self, path: &FieldPath) -> Option<String> {
        let parsed = self.parsed();
        let segment = parsed.segment(&path.segment, path.segment_rep)?;

        let field_num = match path.field {
            Some(f) => f,
            None => return Some(segment.to_string()),
        };

        let d = parsed.delimiters;

        // MSH is special: field 1 is the separator itself and field 2 the
        // encoding characters, so numbering past them is offset by one.
        let mut effective_field = field_num;
        if path.segment == "MSH" {
            if field_num == 1 {
                return Some(d.field.to_string());
            }
            if field_num == 2 {
                let chars: Vec<char> = segment.chars().collect();
                if chars.len() >= 8 {
                    return Some(chars[4..8].iter().collect());
                }
                return None;
            }
            effective_field = field_num - 1;
        }

        let fields: Vec<&str> = segment.split(d.field).collect();
        let field_value = *fields.get(effective_field)?;

        let value = if field_value.contains(d.repetition) {
            let reps: Vec<&str> = field_value.split(d.repetition).collect();
            *reps.get(path.field_rep)?
        } else if path.field_rep > 0 {
            return None;
        } else {
            field_value
        };

        let value = match path.component {
            None => value.to_string(),
            Some(comp) => {
                let components: Vec<&str> = value.split(d.component).collect();
                let comp_value = *components.get(comp - 1)?;
                match path.subcomponent {
                    None => comp_value.to_string(),
                    Some(sub) => {
                        let subs: Vec<&str> = comp_value.split(d.subcomponent).collect();
                        (*subs.get(sub - 1)?).to_string()
                    }
                }
            }
        };

        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    /// Set a field value, returning new raw bytes.
    ///
    /// The original view and its raw bytes are untouched. Missing trailing
    /// fields/repetitions/components are created as empty on the way to the
    /// target position.
    pub fn set_field(&self, path: &str, value: &str) -> Result<Vec<u8>, EngineError> {
        let path = FieldPath::parse(path)?;
        let field_num = path.field.ok_or_else(|| EngineError::Validation {
            reason: format!("cannot set segment-only path '{}'", path.segment),
        })?;

        let parsed = self.parsed();
        let d = parsed.delimiters;

        let seg_indices =
            parsed
                .segment_map
                .get(&path.segment)
                .ok_or_else(|| EngineError::Validation {
                    reason: format!("segment not found: {}", path.segment),
                })?;
        let seg_idx = *seg_indices
            .get(path.segment_rep)
            .ok_or_else(|| EngineError::Validation {
                reason: format!(
                    "segment not found: {}({})",
                    path.segment,
                    path.segment_rep + 1
                ),
            })?;
        let segment = parsed
            .segments
            .get(seg_idx)
            .ok_or_else(|| EngineError::Validation {
                reason: format!("segment not found: {}", path.segment),
            })?;

        let mut fields: Vec<String> = segment.split(d.field).map(str::to_string).collect();

        let mut effective_field = field_num;
        if path.segment == "MSH" && field_num > 1 {
            effective_field = field_num - 1;
        }

        while fields.len() <= effective_field {
            fields.push(String::new());
        }

        let current = fields
            .get(effective_field)
            .cloned()
            .unwrap_or_default();
        let mut reps: Vec<String> = if current.contains(d.repetition) {
            current.split(d.repetition).map(str::to_string).collect()
        } else {
            vec![current]
        };
        while reps.len() <= path.field_rep {
            reps.push(String::new());
        }

        let updated_rep = match path.component {
            None => value.to_string(),
            Some(comp) => {
                let rep_value = reps.get(path.field_rep).cloned().unwrap_or_default();
                let mut components: Vec<String> =
                    rep_value.split(d.component).map(str::to_string).collect();
                while components.len() < comp {
                    components.push(String::new());
                }
                let updated_comp = match path.subcomponent {
                    None => value.to_string(),
                    Some(sub) => {
                        let comp_value = components.get(comp - 1).cloned().unwrap_or_default();
                        let mut subs: Vec<String> =
                            comp_value.split(d.subcomponent).map(str::to_string).collect();
                        while subs.len() < sub {
                            subs.push(String::new());
                        }
                        if let Some(slot) = subs.get_mut(sub - 1) {
                            *slot = value.to_string();
                        }
                        subs.join(&d.subcomponent.to_string())
                    }
                };
                if let Some(slot) = components.get_mut(comp - 1) {
                    *slot = updated_comp;
                }
                components.join(&d.component.to_string())
            }
        };
        if let Some(slot) = reps.get_mut(path.field_rep) {
            *slot = updated_rep;
        }

        if let Some(slot) = fields.get_mut(effective_field) {
            *slot = reps.join(&d.repetition.to_string());
        }

        let new_segment = fields.join(&d.field.to_string());
        let mut new_segments = parsed.segments.clone();
        if let Some(slot) = new_segments.get_mut(seg_idx) {
            *slot = new_segment;
        }

        Ok(new_segments.join("\r").into_bytes())
    }

    // Convenience accessors

    /// Message type composed as `MSH-9.1 + "_" + MSH-9.2` when both present.
    pub fn message_type(&self) -> Option<String> {
        let msg_type = self.get_field("MSH-9.1")?;
        match self.get_field("MSH-9.2") {
            Some(trigger) => Some(format!("{msg_type}_{trigger}")),
            None => Some(msg_type),
        }
    }

    /// Message control id (`MSH-10`).
    pub fn message_control_id(&self) -> Option<String> {
        self.get_field("MSH-10")
    }

    /// Sending application (`MSH-3`).
    pub fn sending_application(&self) -> Option<String> {
        self.get_field("MSH-3")
    }

    /// Sending facility (`MSH-4`).
    pub fn sending_facility(&self) -> Option<String> {
        self.get_field("MSH-4")
    }

    /// Receiving application (`MSH-5`).
    pub fn receiving_application(&self) -> Option<String> {
        self.get_field("MSH-5")
    }

    /// Receiving facility (`MSH-6`).
    pub fn receiving_facility(&self) -> Option<String> {
        self.get_field("MSH-6")
    }

    /// Patient id (`PID-3.1`).
    pub fn patient_id(&self) -> Option<String> {
        self.get_field("PID-3.1")
    }

    /// Patient name (`PID-5`).
    pub fn patient_name(&self) -> Option<String> {
        self.get_field("PID-5")
    }
}
