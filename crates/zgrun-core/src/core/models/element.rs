use super::bunch::Bunch;
use crate::core::utils::relativity::ELEMENTARY_CHARGE;
use phf::{Set, phf_set};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ELEMENT_UID: AtomicU64 = AtomicU64::new(1);

/// Keywords of elements that need a preceding `PARTICUL` to define mass and charge.
pub static REQUIRES_PARTICLE_DEFINITION: Set<&'static str> = phf_set! {
    "ELMULT",
    "CAVITE",
    "EL2TUB",
    "ELREVOL",
    "UNIPOT",
};

/// A single parameter value as written into the engine input.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// `true` for numeric zero values.
    pub fn is_zero(&self) -> bool {
        match self {
            ParamValue::Int(value) => *value == 0,
            ParamValue::Float(value) => *value == 0.0,
            ParamValue::Text(_) => false,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(value) => write!(f, "{}", value),
            ParamValue::Float(value) => write!(f, "{}", value),
            ParamValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A file an element writes into the run directory before the engine starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SideFile {
    pub name: String,
    pub contents: Arc<str>,
}

/// A keyword-driven element with ordered rows of named parameters.
///
/// Each row is rendered on its own input line, values separated by a space, in the
/// order they were given.
#[derive(Debug, Clone)]
pub struct GenericElement {
    pub keyword: String,
    pub rows: Vec<Vec<Param>>,
    pub side_files: Vec<SideFile>,
    /// Flips the element's direction-dependent parameters when a line is reversed.
    pub reverse_hook: Option<fn(&mut GenericElement)>,
}

impl GenericElement {
    pub fn new(keyword: impl Into<String>, rows: Vec<Vec<Param>>) -> Self {
        Self {
            keyword: keyword.into(),
            rows,
            side_files: Vec::new(),
            reverse_hook: None,
        }
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.rows
            .iter()
            .flatten()
            .find(|param| param.name == name)
            .map(|param| &param.value)
    }

    pub fn param_mut(&mut self, name: &str) -> Option<&mut ParamValue> {
        self.rows
            .iter_mut()
            .flatten()
            .find(|param| param.name == name)
            .map(|param| &mut param.value)
    }
}

/// The closed set of element kinds this crate knows how to render.
#[derive(Debug, Clone)]
pub enum ElementKind {
    /// Object definition with a reference particle and sampling steps (KOBJ 5),
    /// used for transfer-matrix and tune runs. Rigidity in kG·cm.
    Objet5 {
        rigidity: f64,
        steps: [f64; 6],
        reference: [f64; 6],
    },
    /// Object definition listing every particle of a bunch inline (KOBJ 2).
    ObjetBunch { bunch: Bunch },
    /// Mass (MeV/c²), charge (C), anomalous magnetic moment and lifetime (s).
    Particul {
        mass: f64,
        charge: f64,
        g_factor: f64,
        lifetime: f64,
    },
    Marker,
    /// Records particle coordinates into the named trajectory file.
    Faiscnl { file_name: String },
    Matrix { order: u8, focus: u8 },
    Rebelote { passes: u32, write_flag: u8, k: u8 },
    /// Field-free drift, length in cm.
    Drift { length: f64 },
    End,
    Generic(GenericElement),
    /// Pre-rendered input text, emitted verbatim. Its keyword is the one opening the
    /// text, or `RAW`.
    Raw(Arc<str>),
}

/// A beamline element.
///
/// Every element carries a process-unique identity. Cloning keeps the identity, so a
/// clone still matches the original in positional lookups such as
/// [`Line::find_elements`](super::line::Line::find_elements); use
/// [`Element::duplicate`] for an independent copy.
#[derive(Debug, Clone)]
pub struct Element {
    uid: u64,
    label1: String,
    label2: String,
    kind: ElementKind,
    input_files: Vec<PathBuf>,
}

impl Element {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            uid: NEXT_ELEMENT_UID.fetch_add(1, Ordering::Relaxed),
            label1: String::new(),
            label2: String::new(),
            kind,
            input_files: Vec::new(),
        }
    }

    pub fn with_labels(mut self, label1: impl Into<String>, label2: impl Into<String>) -> Self {
        self.label1 = label1.into();
        self.label2 = label2.into();
        self
    }

    /// Declares auxiliary files the element needs in the run directory.
    pub fn with_input_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.input_files.extend(files.into_iter().map(Into::into));
        self
    }

    /// Reference-particle object definition at the given rigidity (kG·cm), with the
    /// usual sampling steps for a first-order matrix computation.
    pub fn objet5(rigidity: f64) -> Self {
        Self::new(ElementKind::Objet5 {
            rigidity,
            steps: [0.001, 0.01, 0.001, 0.01, 0.001, 0.0001],
            reference: [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        })
    }

    pub fn objet_bunch(bunch: Bunch) -> Self {
        Self::new(ElementKind::ObjetBunch { bunch })
    }

    /// Particle definition from a rest energy in eV and a charge in units of e.
    pub fn particul(mass: f64, charge: f64) -> Self {
        Self::new(ElementKind::Particul {
            mass: mass / 1e6,
            charge: charge * ELEMENTARY_CHARGE,
            g_factor: 0.0,
            lifetime: 0.0,
        })
    }

    pub fn marker(label: impl Into<String>) -> Self {
        Self::new(ElementKind::Marker).with_labels(label, "")
    }

    pub fn faiscnl(file_name: impl Into<String>) -> Self {
        Self::new(ElementKind::Faiscnl {
            file_name: file_name.into(),
        })
    }

    pub fn matrix(order: u8, focus: u8) -> Self {
        Self::new(ElementKind::Matrix { order, focus })
    }

    pub fn rebelote(passes: u32) -> Self {
        Self::new(ElementKind::Rebelote {
            passes,
            write_flag: 1,
            k: 99,
        })
    }

    /// Drift of the given length in metres.
    pub fn drift(length: f64) -> Self {
        Self::new(ElementKind::Drift {
            length: length * 100.0,
        })
    }

    pub fn end() -> Self {
        Self::new(ElementKind::End)
    }

    pub fn generic(keyword: impl Into<String>, rows: Vec<Vec<Param>>) -> Self {
        Self::new(ElementKind::Generic(GenericElement::new(keyword, rows)))
    }

    pub fn raw(text: impl Into<Arc<str>>) -> Self {
        Self::new(ElementKind::Raw(text.into()))
    }

    /// A copy of this element with a fresh identity.
    pub fn duplicate(&self) -> Self {
        Self {
            uid: NEXT_ELEMENT_UID.fetch_add(1, Ordering::Relaxed),
            ..self.clone()
        }
    }

    /// `true` if both handles refer to the same element.
    pub fn is_same(&self, other: &Element) -> bool {
        self.uid == other.uid
    }

    pub fn label1(&self) -> &str {
        &self.label1
    }

    pub fn label2(&self) -> &str {
        &self.label2
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut ElementKind {
        &mut self.kind
    }

    pub fn input_files(&self) -> &[PathBuf] {
        &self.input_files
    }

    /// The engine keyword that opens this element's input block.
    pub fn keyword(&self) -> &str {
        match &self.kind {
            ElementKind::Objet5 { .. } | ElementKind::ObjetBunch { .. } => "OBJET",
            ElementKind::Particul { .. } => "PARTICUL",
            ElementKind::Marker => "MARKER",
            ElementKind::Faiscnl { .. } => "FAISCNL",
            ElementKind::Matrix { .. } => "MATRIX",
            ElementKind::Rebelote { .. } => "REBELOTE",
            ElementKind::Drift { .. } => "DRIFT",
            ElementKind::End => "END",
            ElementKind::Generic(generic) => &generic.keyword,
            ElementKind::Raw(text) => raw_keyword(text),
        }
    }

    /// The element type name recorded for a run. Object definitions carry their sub-kind.
    pub fn type_name(&self) -> &str {
        match &self.kind {
            ElementKind::Objet5 { .. } => "OBJET5",
            ElementKind::ObjetBunch { .. } => "OBJET2",
            ElementKind::Raw(text) if self.keyword() == "OBJET" => raw_objet_type(text),
            _ => self.keyword(),
        }
    }

    pub fn is_objet(&self) -> bool {
        match &self.kind {
            ElementKind::Objet5 { .. } | ElementKind::ObjetBunch { .. } => true,
            ElementKind::Generic(_) | ElementKind::Raw(_) => self.keyword().contains("OBJET"),
            _ => false,
        }
    }

    pub fn is_end(&self) -> bool {
        match &self.kind {
            ElementKind::End => true,
            ElementKind::Raw(_) => self.keyword() == "END",
            _ => false,
        }
    }

    /// Looks up a named parameter. Drifts expose their length as `XL`.
    pub fn param(&self, name: &str) -> Option<ParamValue> {
        match &self.kind {
            ElementKind::Generic(generic) => generic.param(name).cloned(),
            ElementKind::Drift { length } if name == "XL" => Some(ParamValue::Float(*length)),
            _ => None,
        }
    }

    /// Overwrites an existing named parameter, returning `false` if the element has none.
    pub fn set_param(&mut self, name: &str, value: impl Into<ParamValue>) -> bool {
        match &mut self.kind {
            ElementKind::Generic(generic) => match generic.param_mut(name) {
                Some(slot) => {
                    *slot = value.into();
                    true
                }
                None => false,
            },
            ElementKind::Drift { length } if name == "XL" => match value.into() {
                ParamValue::Float(value) => {
                    *length = value;
                    true
                }
                ParamValue::Int(value) => {
                    *length = value as f64;
                    true
                }
                ParamValue::Text(_) => false,
            },
            _ => false,
        }
    }

    /// Flips direction-dependent state for a reversed line.
    pub fn reverse(&mut self) {
        if let ElementKind::Generic(generic) = &mut self.kind {
            if let Some(hook) = generic.reverse_hook {
                hook(generic);
            }
        }
    }

    /// Writes the element's side files into the run directory.
    pub fn setup(&self, dir: &Path) -> io::Result<()> {
        if let ElementKind::Generic(generic) = &self.kind {
            for side_file in &generic.side_files {
                fs::write(dir.join(&side_file.name), side_file.contents.as_bytes())?;
            }
        }
        Ok(())
    }

    fn header(&self) -> String {
        let mut header = format!("'{}'", self.keyword());
        for label in [&self.label1, &self.label2] {
            if !label.is_empty() {
                header.push(' ');
                header.push_str(label);
            }
        }
        header
    }

    /// Renders the element as engine input text, without a trailing newline.
    pub fn render(&self) -> String {
        let header = self.header();
        match &self.kind {
            ElementKind::Objet5 {
                rigidity,
                steps,
                reference,
            } => format!(
                "{header}\n{rigidity}\n5\n{}\n{}",
                join_values(steps),
                join_values(reference)
            ),
            ElementKind::ObjetBunch { bunch } => render_bunch_objet(&header, bunch),
            ElementKind::Particul {
                mass,
                charge,
                g_factor,
                lifetime,
            } => format!("{header}\n{mass} {charge} {g_factor} {lifetime} 0"),
            ElementKind::Marker | ElementKind::End => header,
            ElementKind::Faiscnl { file_name } => format!("{header}\n{file_name}"),
            ElementKind::Matrix { order, focus } => format!("{header}\n{order} {focus}"),
            ElementKind::Rebelote {
                passes,
                write_flag,
                k,
            } => format!("{header}\n{passes} {write_flag} {k}"),
            ElementKind::Drift { length } => format!("{header}\n{length}"),
            ElementKind::Generic(generic) => {
                let mut out = header;
                for row in &generic.rows {
                    out.push('\n');
                    let values: Vec<String> = row.iter().map(|p| p.value.to_string()).collect();
                    out.push_str(&values.join(" "));
                }
                out
            }
            ElementKind::Raw(text) => text.trim_end_matches('\n').to_string(),
        }
    }
}

fn raw_keyword(text: &str) -> &str {
    text.trim_start()
        .strip_prefix('\'')
        .and_then(|rest| rest.split('\'').next())
        .filter(|keyword| !keyword.is_empty())
        .unwrap_or("RAW")
}

/// Sub-kind of a raw OBJET block, read from its KOBJ line (the third line).
fn raw_objet_type(text: &str) -> &'static str {
    let kobj = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .nth(2)
        .and_then(|line| line.split_whitespace().next())
        .and_then(|token| token.split('.').next());
    match kobj {
        Some("5") => "OBJET5",
        Some("2") => "OBJET2",
        _ => "OBJET",
    }
}

fn join_values(values: &[f64]) -> String {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// KOBJ 2 block: rigidity in kG·cm, one row per particle in engine units
/// (cm, mrad, relative rigidity), then one survival flag per particle.
fn render_bunch_objet(header: &str, bunch: &Bunch) -> String {
    let mut out = format!(
        "{header}\n{}\n2\n{} 1",
        bunch.rigidity() * 1000.0,
        bunch.len()
    );
    for particle in bunch.particles() {
        out.push_str(&format!(
            "\n{} {} {} {} {} {} 'A'",
            particle.y * 100.0,
            particle.t * 1000.0,
            particle.z * 100.0,
            particle.p * 1000.0,
            particle.s * 100.0,
            particle.d
        ));
    }
    out.push('\n');
    out.push_str(&vec!["1"; bunch.len()].join(" "));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::bunch::Particle;
    use tempfile::tempdir;

    fn quad() -> Element {
        Element::generic(
            "QUADRUPO",
            vec![
                vec![Param::new("IL", 0)],
                vec![Param::new("XL", 20.0), Param::new("R0", 5.0), Param::new("B0", 3.5)],
                vec![Param::new("XPAS", 0.5)],
            ],
        )
    }

    #[test]
    fn clone_keeps_identity_and_duplicate_does_not() {
        let element = Element::marker("m1");
        let clone = element.clone();
        let copy = element.duplicate();
        assert!(element.is_same(&clone));
        assert!(!element.is_same(&copy));
        assert!(!element.is_same(&Element::marker("m1")));
    }

    #[test]
    fn header_includes_only_non_empty_labels() {
        assert_eq!(Element::end().render(), "'END'");
        assert_eq!(Element::marker("trackbun").render(), "'MARKER' trackbun");
        assert_eq!(
            Element::new(ElementKind::Marker).with_labels("a", "b").render(),
            "'MARKER' a b"
        );
    }

    #[test]
    fn generic_element_renders_rows_in_order() {
        assert_eq!(quad().render(), "'QUADRUPO'\n0\n20 5 3.5\n0.5");
    }

    #[test]
    fn set_param_only_touches_existing_parameters() {
        let mut element = quad();
        assert!(element.set_param("IL", 2));
        assert_eq!(element.param("IL"), Some(ParamValue::Int(2)));
        assert!(!element.set_param("MISSING", 1));
        assert!(!Element::marker("m").set_param("IL", 2));
    }

    #[test]
    fn drift_exposes_length_in_cm() {
        let drift = Element::drift(0.5);
        assert_eq!(drift.param("XL"), Some(ParamValue::Float(50.0)));
        assert_eq!(drift.render(), "'DRIFT'\n50");
    }

    #[test]
    fn object_definitions_report_their_sub_kind() {
        assert_eq!(Element::objet5(1000.0).type_name(), "OBJET5");
        assert_eq!(Element::objet_bunch(Bunch::default()).type_name(), "OBJET2");
        assert!(Element::objet5(1000.0).is_objet());
        assert!(Element::generic("MCOBJET", vec![]).is_objet());
        assert!(!Element::end().is_objet());
    }

    #[test]
    fn bunch_objet_renders_particles_in_engine_units() {
        let particles = vec![
            Particle::reference(),
            Particle {
                y: 0.01,
                t: 0.002,
                ..Particle::reference()
            },
        ];
        let bunch = Bunch::from_particles(particles, 0.5, 938e6, 1.0);
        let text = Element::objet_bunch(bunch).render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "'OBJET'");
        assert_eq!(lines[1], "500");
        assert_eq!(lines[2], "2");
        assert_eq!(lines[3], "2 1");
        assert_eq!(lines[4], "0 0 0 0 0 1 'A'");
        assert_eq!(lines[5], "1 2 0 0 0 1 'A'");
        assert_eq!(lines[6], "1 1");
    }

    #[test]
    fn particul_converts_to_engine_units() {
        let element = Element::particul(938e6, 1.0);
        let ElementKind::Particul { mass, charge, .. } = element.kind() else {
            panic!("expected a particle definition");
        };
        assert_eq!(*mass, 938.0);
        assert_eq!(*charge, ELEMENTARY_CHARGE);
    }

    fn flip_angle(generic: &mut GenericElement) {
        if let Some(ParamValue::Float(angle)) = generic.param_mut("ANGLE") {
            *angle = -*angle;
        }
    }

    #[test]
    fn reverse_runs_the_hook_of_generic_elements() {
        let mut bend = Element::generic("BEND", vec![vec![Param::new("ANGLE", 1.0)]]);
        if let ElementKind::Generic(generic) = bend.kind_mut() {
            generic.reverse_hook = Some(flip_angle);
        }
        bend.reverse();
        assert_eq!(bend.param("ANGLE"), Some(ParamValue::Float(-1.0)));
    }

    #[test]
    fn setup_writes_side_files() {
        let dir = tempdir().unwrap();
        let mut element = Element::generic("TOSCA", vec![]);
        if let ElementKind::Generic(generic) = element.kind_mut() {
            generic.side_files.push(SideFile {
                name: "field.map".to_string(),
                contents: Arc::from("0 0 0\n"),
            });
        }
        element.setup(dir.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("field.map")).unwrap(),
            "0 0 0\n"
        );
    }

    #[test]
    fn raw_element_is_emitted_verbatim() {
        let element = Element::raw("'DRIFT'\n10\n");
        assert_eq!(element.render(), "'DRIFT'\n10");
        assert_eq!(element.keyword(), "DRIFT");
        assert_eq!(Element::raw("10 20\n").keyword(), "RAW");
    }

    #[test]
    fn raw_objet_reports_its_sub_kind() {
        let objet = Element::raw("'OBJET' start\n1000.0\n5.01\n0.1 0.1\n");
        assert!(objet.is_objet());
        assert_eq!(objet.type_name(), "OBJET5");
        assert_eq!(Element::raw("'OBJET'\n1000\n2\n").type_name(), "OBJET2");
        assert!(Element::raw("'END'").is_end());
    }
}
