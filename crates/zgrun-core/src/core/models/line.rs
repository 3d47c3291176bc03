use super::check::{self, LineReport};
use super::element::{Element, ElementKind};
use crate::core::io::input;
use crate::core::io::workspace::RunRegistry;
use std::fmt;
use std::fs;
use std::io;
use std::ops::{Add, Mul, Neg};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineError {
    #[error("Index {index} is out of range for a line of {len} elements")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Element not found in line")]
    ElementNotFound,
    #[error("Requested occurrence {requested} but the element appears {found} time(s)")]
    OccurrenceOutOfRange { requested: usize, found: usize },
    #[error("Line '{0}' has no object definition (OBJET)")]
    NoObjet(String),
}

/// One entry of a line: a leaf element or a nested line.
#[derive(Debug, Clone)]
pub enum LineItem {
    Element(Element),
    Line(Line),
}

impl From<Element> for LineItem {
    fn from(element: Element) -> Self {
        LineItem::Element(element)
    }
}

impl From<Line> for LineItem {
    fn from(line: Line) -> Self {
        LineItem::Line(line)
    }
}

/// Where a flattened index lives inside the nested structure.
///
/// `line_path` holds the item indices leading from the root line down to the sub-line
/// that directly contains the element; `position` is the element's index in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub line_path: Vec<usize>,
    pub position: usize,
}

/// An ordered, possibly nested, sequence of beamline elements.
///
/// Positional operations (`insert`, `remove`, `replace`, `find_elements`) address
/// elements by their index in the depth-first flattening of the line. The flattened
/// view is derived lazily and dropped whenever the structure changes.
///
/// Cloning a line copies its structure and elements but not the record of runs
/// produced from it.
#[derive(Debug)]
pub struct Line {
    name: String,
    items: Vec<LineItem>,
    full_line: bool,
    input_files: Vec<PathBuf>,
    runs: RunRegistry,
    leaf_paths: OnceLock<Vec<Vec<usize>>>,
}

impl Clone for Line {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            items: self.items.clone(),
            full_line: self.full_line,
            input_files: self.input_files.clone(),
            runs: RunRegistry::new(),
            leaf_paths: OnceLock::new(),
        }
    }
}

impl Line {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
            full_line: false,
            input_files: Vec::new(),
            runs: RunRegistry::new(),
            leaf_paths: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` once an object definition has been added, making this a complete program.
    pub fn is_full_line(&self) -> bool {
        self.full_line
    }

    /// Direct children of this line, sub-lines not expanded.
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn input_files(&self) -> &[PathBuf] {
        &self.input_files
    }

    /// Number of leaf elements across all nesting levels.
    pub fn len(&self) -> usize {
        self.leaf_paths().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends one element or sub-line.
    pub fn push(&mut self, item: impl Into<LineItem>) -> &mut Self {
        let item = item.into();
        self.absorb(&item);
        self.items.push(item);
        self.leaf_paths.take();
        self
    }

    /// Appends elements or sub-lines in order.
    pub fn extend<I, T>(&mut self, items: I) -> &mut Self
    where
        I: IntoIterator<Item = T>,
        T: Into<LineItem>,
    {
        for item in items {
            self.push(item);
        }
        self
    }

    /// Inserts elements or sub-lines at the front, keeping their given order.
    pub fn prepend<I, T>(&mut self, items: I) -> &mut Self
    where
        I: IntoIterator<Item = T>,
        T: Into<LineItem>,
    {
        let new_items: Vec<LineItem> = items.into_iter().map(Into::into).collect();
        for item in &new_items {
            self.absorb(item);
        }
        self.items.splice(0..0, new_items);
        self.leaf_paths.take();
        self
    }

    /// Inserts items before the element at flattened `index`, inside whichever sub-line
    /// holds it. An index equal to [`Line::len`] appends to this line.
    ///
    /// # Errors
    ///
    /// Returns [`LineError::IndexOutOfRange`] for an index past the end.
    pub fn insert<I, T>(&mut self, index: usize, items: I) -> Result<(), LineError>
    where
        I: IntoIterator<Item = T>,
        T: Into<LineItem>,
    {
        let new_items: Vec<LineItem> = items.into_iter().map(Into::into).collect();
        let len = self.len();
        if index == len {
            self.extend(new_items);
            return Ok(());
        }
        let location = self.locate(index)?;
        for item in &new_items {
            self.absorb(item);
        }
        let target = self
            .sub_line_mut(&location.line_path)
            .ok_or(LineError::IndexOutOfRange { index, len })?;
        target
            .items
            .splice(location.position..location.position, new_items);
        Ok(())
    }

    /// Removes and returns the element at flattened `index`.
    pub fn remove(&mut self, index: usize) -> Result<Element, LineError> {
        let len = self.len();
        let location = self.locate(index)?;
        let target = self
            .sub_line_mut(&location.line_path)
            .ok_or(LineError::IndexOutOfRange { index, len })?;
        match target.items.remove(location.position) {
            LineItem::Element(element) => Ok(element),
            LineItem::Line(sub) => {
                target.items.insert(location.position, LineItem::Line(sub));
                Err(LineError::IndexOutOfRange { index, len })
            }
        }
    }

    /// Replaces the `occurrence`-th appearance of `old` with `new`, returning the
    /// element that was taken out.
    ///
    /// # Errors
    ///
    /// Returns [`LineError::ElementNotFound`] if `old` is not in the line and
    /// [`LineError::OccurrenceOutOfRange`] if it appears fewer times than requested.
    pub fn replace(
        &mut self,
        old: &Element,
        new: Element,
        occurrence: usize,
    ) -> Result<Element, LineError> {
        let positions = self.find_elements(old);
        if positions.is_empty() {
            return Err(LineError::ElementNotFound);
        }
        let index = *positions
            .get(occurrence)
            .ok_or(LineError::OccurrenceOutOfRange {
                requested: occurrence,
                found: positions.len(),
            })?;

        let len = self.len();
        let location = self.locate(index)?;
        let new_item = LineItem::Element(new);
        self.absorb(&new_item);
        let slot = self
            .sub_line_mut(&location.line_path)
            .and_then(|target| target.items.get_mut(location.position))
            .ok_or(LineError::IndexOutOfRange { index, len })?;
        match std::mem::replace(slot, new_item) {
            LineItem::Element(element) => Ok(element),
            LineItem::Line(sub) => {
                *slot = LineItem::Line(sub);
                Err(LineError::IndexOutOfRange { index, len })
            }
        }
    }

    /// Flattened positions of every appearance of `element`, by identity.
    pub fn find_elements(&self, element: &Element) -> Vec<usize> {
        self.elements()
            .enumerate()
            .filter(|(_, candidate)| candidate.is_same(element))
            .map(|(index, _)| index)
            .collect()
    }

    /// Resolves a flattened index to the sub-line and local position holding it.
    pub fn locate(&self, index: usize) -> Result<Location, LineError> {
        let paths = self.leaf_paths();
        let out_of_range = LineError::IndexOutOfRange {
            index,
            len: paths.len(),
        };
        let (position, line_path) = paths
            .get(index)
            .and_then(|path| path.split_last())
            .ok_or(out_of_range)?;
        Ok(Location {
            line_path: line_path.to_vec(),
            position: *position,
        })
    }

    /// Leaf elements in depth-first order.
    pub fn elements(&self) -> Elements<'_> {
        Elements {
            stack: vec![self.items.iter()],
        }
    }

    /// Sets the `IL` tracking flag of every element exposing it to 2 (or 0 to disable).
    ///
    /// # Return
    ///
    /// The number of elements updated.
    pub fn full_tracking(&mut self, enable: bool) -> usize {
        let value = if enable { 2 } else { 0 };
        let mut updated = 0;
        self.for_each_element_mut(&mut |element| {
            if element.set_param("IL", value) {
                updated += 1;
            }
        });
        if updated == 0 {
            warn!(line = %self.name, "No element in the line exposes an IL flag");
        }
        updated
    }

    /// Removes every REBELOTE element at every nesting level, returning how many went.
    pub fn remove_looping(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|item| {
            !matches!(item, LineItem::Element(element)
                if matches!(element.kind(), ElementKind::Rebelote { .. }))
        });
        let mut removed = before - self.items.len();
        for item in &mut self.items {
            if let LineItem::Line(sub) = item {
                removed += sub.remove_looping();
            }
        }
        self.leaf_paths.take();
        removed
    }

    /// The first object-definition element.
    pub fn get_objet(&self) -> Result<&Element, LineError> {
        self.elements()
            .find(|element| element.is_objet())
            .ok_or_else(|| LineError::NoObjet(self.name.clone()))
    }

    /// Declares auxiliary files to stage into every run directory. Duplicates are ignored.
    pub fn add_input_files<I, P>(&mut self, files: I) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        for file in files {
            let file = file.into();
            if !self.input_files.contains(&file) {
                self.input_files.push(file);
            }
        }
        self
    }

    /// Declares every regular file in `dir`, optionally only those with `extension`.
    ///
    /// # Return
    ///
    /// The number of files found.
    pub fn add_input_dir(&mut self, dir: &Path, extension: Option<&str>) -> io::Result<usize> {
        let mut found = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(extension) = extension {
                if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
                    continue;
                }
            }
            found.push(path);
        }
        found.sort();
        let count = found.len();
        self.add_input_files(found);
        Ok(count)
    }

    /// Engine input text for this line.
    pub fn output(&self) -> String {
        input::render_line(self)
    }

    pub fn check_line(&self) -> LineReport {
        check::check_line(self)
    }

    /// Run directories produced from this line that may still be alive.
    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    /// Removes every still-alive run directory produced from this line.
    pub fn clean(&self) -> usize {
        self.runs.sweep()
    }

    /// A deep copy with the element order reversed at every level and each element
    /// reversed in place. Elements of the copy get fresh identities.
    pub fn reversed(&self) -> Line {
        let mut reversed = self.clone();
        reversed.name = format!("-{}", self.name);
        reverse_items(&mut reversed);
        reversed
    }

    fn absorb(&mut self, item: &LineItem) {
        match item {
            LineItem::Element(element) => {
                if element.is_objet() {
                    self.full_line = true;
                }
                self.add_input_files(element.input_files().iter().cloned());
            }
            LineItem::Line(sub) => {
                if sub.full_line {
                    warn!(
                        line = %self.name,
                        sub_line = %sub.name,
                        "Adding a line that defines its own OBJET as a sub-line"
                    );
                }
                self.add_input_files(sub.input_files.iter().cloned());
            }
        }
    }

    fn leaf_paths(&self) -> &[Vec<usize>] {
        self.leaf_paths.get_or_init(|| collect_leaf_paths(&self.items))
    }

    /// Walks down `path`, dropping the flattened view of every line on the way.
    fn sub_line_mut(&mut self, path: &[usize]) -> Option<&mut Line> {
        self.leaf_paths.take();
        let mut current = self;
        for &index in path {
            current = match current.items.get_mut(index) {
                Some(LineItem::Line(sub)) => {
                    sub.leaf_paths.take();
                    sub
                }
                _ => return None,
            };
        }
        Some(current)
    }

    fn for_each_element_mut<F: FnMut(&mut Element)>(&mut self, f: &mut F) {
        for item in &mut self.items {
            match item {
                LineItem::Element(element) => f(element),
                LineItem::Line(sub) => sub.for_each_element_mut(f),
            }
        }
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        writeln!(f, "{}{}", prefix, self.name)?;
        let child_prefix = format!("{prefix} ");
        for item in &self.items {
            match item {
                LineItem::Element(element) => {
                    let row = format!(
                        "{}{} {} {}",
                        child_prefix,
                        element.type_name(),
                        element.label1(),
                        element.label2()
                    );
                    writeln!(f, "{}", row.trim_end())?;
                }
                LineItem::Line(sub) => sub.fmt_tree(f, &child_prefix)?,
            }
        }
        Ok(())
    }
}

fn collect_leaf_paths(items: &[LineItem]) -> Vec<Vec<usize>> {
    let mut paths = Vec::new();
    let mut prefix: Vec<usize> = Vec::new();
    let mut stack: Vec<(&[LineItem], usize)> = vec![(items, 0)];
    while let Some(frame) = stack.last_mut() {
        let (level, next) = *frame;
        if next >= level.len() {
            stack.pop();
            prefix.pop();
            continue;
        }
        frame.1 += 1;
        match &level[next] {
            LineItem::Element(_) => {
                let mut path = prefix.clone();
                path.push(next);
                paths.push(path);
            }
            LineItem::Line(sub) => {
                prefix.push(next);
                stack.push((sub.items.as_slice(), 0));
            }
        }
    }
    paths
}

fn reverse_items(line: &mut Line) {
    line.items.reverse();
    for item in &mut line.items {
        match item {
            LineItem::Element(element) => {
                let mut copy = element.duplicate();
                copy.reverse();
                *element = copy;
            }
            LineItem::Line(sub) => reverse_items(sub),
        }
    }
    line.leaf_paths.take();
}

fn flat_copy(name: &str, parts: &[&Line]) -> Line {
    let mut line = Line::new(name);
    for part in parts {
        line.extend(part.elements().cloned());
        line.add_input_files(part.input_files.iter().cloned());
    }
    line
}

/// Depth-first iterator over the leaf elements of a [`Line`].
pub struct Elements<'a> {
    stack: Vec<std::slice::Iter<'a, LineItem>>,
}

impl<'a> Iterator for Elements<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<&'a Element> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(LineItem::Element(element)) => return Some(element),
                Some(LineItem::Line(sub)) => self.stack.push(sub.items.iter()),
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, "")
    }
}

/// Flat concatenation; sub-line structure is not preserved.
impl Add for &Line {
    type Output = Line;

    fn add(self, rhs: &Line) -> Line {
        flat_copy(&self.name, &[self, rhs])
    }
}

impl Add for Line {
    type Output = Line;

    fn add(self, rhs: Line) -> Line {
        &self + &rhs
    }
}

/// Flat repetition; sub-line structure is not preserved.
impl Mul<usize> for &Line {
    type Output = Line;

    fn mul(self, count: usize) -> Line {
        flat_copy(&self.name, &vec![self; count])
    }
}

impl Mul<usize> for Line {
    type Output = Line;

    fn mul(self, count: usize) -> Line {
        &self * count
    }
}

impl Mul<&Line> for usize {
    type Output = Line;

    fn mul(self, line: &Line) -> Line {
        line * self
    }
}

impl Neg for &Line {
    type Output = Line;

    fn neg(self) -> Line {
        self.reversed()
    }
}

impl Neg for Line {
    type Output = Line;

    fn neg(self) -> Line {
        self.reversed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::element::{Param, ParamValue};
    use tempfile::tempdir;

    fn labels(line: &Line) -> Vec<String> {
        line.elements().map(|e| e.label1().to_string()).collect()
    }

    fn marker_line(name: &str, labels: &[&str]) -> Line {
        let mut line = Line::new(name);
        line.extend(labels.iter().map(|label| Element::marker(*label)));
        line
    }

    /// a [b [c d] e] f, leaves at depths 0, 1 and 2.
    fn nested() -> Line {
        let inner = marker_line("inner", &["c", "d"]);
        let mut middle = Line::new("middle");
        middle.push(Element::marker("b")).push(inner).push(Element::marker("e"));
        let mut outer = Line::new("outer");
        outer
            .push(Element::marker("a"))
            .push(middle)
            .push(Element::marker("f"));
        outer
    }

    #[test]
    fn elements_are_yielded_depth_first() {
        let line = nested();
        assert_eq!(labels(&line), ["a", "b", "c", "d", "e", "f"]);
        assert_eq!(line.len(), 6);
        assert_eq!(labels(&line), labels(&line));
    }

    #[test]
    fn flattening_a_flat_line_reproduces_it() {
        let line = nested();
        let flat = flat_copy(line.name(), &[&line]);
        let flatter = flat_copy(flat.name(), &[&flat]);
        assert_eq!(labels(&flat), labels(&flatter));
        assert!(flat.items().iter().all(|i| matches!(i, LineItem::Element(_))));
    }

    #[test]
    fn locate_resolves_every_nesting_depth() {
        let line = nested();
        let expected = [
            (vec![], 0),
            (vec![1], 0),
            (vec![1, 1], 0),
            (vec![1, 1], 1),
            (vec![1], 2),
            (vec![], 2),
        ];
        for (index, (line_path, position)) in expected.into_iter().enumerate() {
            assert_eq!(line.locate(index).unwrap(), Location { line_path, position });
        }
        assert_eq!(
            line.locate(6),
            Err(LineError::IndexOutOfRange { index: 6, len: 6 })
        );
    }

    #[test]
    fn remove_agrees_with_locate_at_each_depth() {
        let all = ["a", "b", "c", "d", "e", "f"];
        let sub_line_sizes = [(vec![], 3), (vec![1], 3), (vec![1, 1], 2)];
        for (index, label) in all.into_iter().enumerate() {
            let mut line = nested();
            let location = line.locate(index).unwrap();
            let removed = line.remove(index).unwrap();
            assert_eq!(removed.label1(), label);

            let expected: Vec<&str> = all.iter().copied().filter(|l| *l != label).collect();
            assert_eq!(labels(&line), expected);

            let (_, before) = sub_line_sizes
                .iter()
                .find(|(path, _)| *path == location.line_path)
                .unwrap();
            let mut holder = &line;
            for &step in &location.line_path {
                let LineItem::Line(sub) = &holder.items()[step] else {
                    panic!("path must lead through sub-lines");
                };
                holder = sub;
            }
            assert_eq!(holder.items().len(), before - 1);
        }
    }

    #[test]
    fn insert_lands_in_the_sub_line_holding_the_index() {
        let mut line = nested();
        line.insert(2, [Element::marker("x")]).unwrap();
        assert_eq!(labels(&line), ["a", "b", "x", "c", "d", "e", "f"]);
        assert_eq!(
            line.locate(2).unwrap(),
            Location {
                line_path: vec![1, 1],
                position: 0
            }
        );

        line.insert(1, [Element::marker("y"), Element::marker("z")]).unwrap();
        assert_eq!(labels(&line), ["a", "y", "z", "b", "x", "c", "d", "e", "f"]);
        assert_eq!(line.locate(1).unwrap().line_path, vec![1]);
    }

    #[test]
    fn insert_at_len_appends_and_past_len_fails() {
        let mut line = nested();
        line.insert(6, [Element::marker("g")]).unwrap();
        assert_eq!(labels(&line).last().unwrap(), "g");
        assert_eq!(
            line.insert(9, [Element::marker("h")]),
            Err(LineError::IndexOutOfRange { index: 9, len: 7 })
        );
    }

    #[test]
    fn replace_targets_the_requested_occurrence() {
        let shared = Element::marker("s");
        let mut inner = Line::new("inner");
        inner.push(shared.clone());
        let mut line = Line::new("outer");
        line.push(shared.clone()).push(inner).push(shared.clone());
        assert_eq!(line.find_elements(&shared), vec![0, 1, 2]);

        let taken = line.replace(&shared, Element::marker("r"), 1).unwrap();
        assert!(taken.is_same(&shared));
        assert_eq!(labels(&line), ["s", "r", "s"]);
        assert_eq!(line.locate(1).unwrap().line_path, vec![1]);
        assert_eq!(line.find_elements(&shared), vec![0, 2]);
    }

    #[test]
    fn replace_reports_missing_elements_and_occurrences() {
        let shared = Element::marker("s");
        let mut line = Line::new("l");
        line.push(shared.clone());
        assert_eq!(
            line.replace(&Element::marker("s"), Element::end(), 0)
                .unwrap_err(),
            LineError::ElementNotFound
        );
        assert_eq!(
            line.replace(&shared, Element::end(), 3).unwrap_err(),
            LineError::OccurrenceOutOfRange {
                requested: 3,
                found: 1
            }
        );
    }

    #[test]
    fn prepend_keeps_the_given_order() {
        let mut line = marker_line("l", &["c"]);
        line.prepend([Element::marker("a"), Element::marker("b")]);
        assert_eq!(labels(&line), ["a", "b", "c"]);
    }

    #[test]
    fn concatenation_is_associative_on_flattened_order() {
        let a = nested();
        let b = marker_line("b", &["g", "h"]);
        let c = marker_line("c", &["i"]);
        let left = &(&a + &b) + &c;
        let right = &a + &(&b + &c);
        assert_eq!(labels(&left), labels(&right));
        assert_eq!(left.len(), 9);
        assert_eq!(left.name(), "outer");
    }

    #[test]
    fn extend_and_plus_coexist_on_owned_lines() {
        let mut head = Line::new("head");
        head.extend([Element::marker("a")])
            .extend(vec![Element::marker("b")]);
        let mut tail = Line::new("tail");
        tail.extend([Element::marker("c")]);

        let joined = head + tail;
        assert_eq!(labels(&joined), ["a", "b", "c"]);
        assert_eq!(joined.name(), "head");

        let mut grown = joined;
        grown.extend([Element::marker("d")]);
        assert_eq!(labels(&grown), ["a", "b", "c", "d"]);
    }

    #[test]
    fn repetition_repeats_the_flattened_sequence() {
        let line = marker_line("cell", &["a", "b"]);
        assert_eq!(labels(&(&line * 3)), ["a", "b", "a", "b", "a", "b"]);
        assert_eq!(labels(&(2 * &line)), ["a", "b", "a", "b"]);
        assert!((&line * 0).is_empty());
    }

    #[test]
    fn structural_copies_do_not_alias_the_operand() {
        let line = marker_line("l", &["a", "b"]);
        let mut copy = &line * 1;
        copy.remove(0).unwrap();
        copy.push(Element::marker("z"));
        assert_eq!(labels(&line), ["a", "b"]);
    }

    #[test]
    fn reversal_is_an_involution_on_order() {
        let line = nested();
        let reversed = -&line;
        assert_eq!(reversed.name(), "-outer");
        assert_eq!(labels(&reversed), ["f", "e", "d", "c", "b", "a"]);
        assert_eq!(labels(&-reversed), labels(&line));
    }

    #[test]
    fn reversal_gives_elements_fresh_identities() {
        let element = Element::marker("a");
        let mut line = Line::new("l");
        line.push(element.clone());
        let reversed = line.reversed();
        assert!(reversed.find_elements(&element).is_empty());
        assert_eq!(line.find_elements(&element), vec![0]);
    }

    #[test]
    fn adding_an_objet_makes_a_full_line() {
        let mut line = Line::new("l");
        line.push(Element::marker("m"));
        assert!(!line.is_full_line());
        line.push(Element::objet5(1000.0));
        assert!(line.is_full_line());
        assert!(line.get_objet().unwrap().is_objet());
        assert_eq!(
            Line::new("empty").get_objet().unwrap_err(),
            LineError::NoObjet("empty".to_string())
        );
    }

    #[test]
    fn full_tracking_sets_il_on_every_exposing_element() {
        let quad = || Element::generic("QUADRUPO", vec![vec![Param::new("IL", 0)]]);
        let mut inner = Line::new("inner");
        inner.push(quad());
        let mut line = Line::new("l");
        line.push(quad()).push(Element::marker("m")).push(inner);

        assert_eq!(line.full_tracking(true), 2);
        assert!(
            line.elements()
                .filter(|e| e.keyword() == "QUADRUPO")
                .all(|e| e.param("IL") == Some(ParamValue::Int(2)))
        );
        assert_eq!(marker_line("m", &["a"]).full_tracking(true), 0);
    }

    #[test]
    fn remove_looping_strips_rebelote_at_every_level() {
        let mut inner = Line::new("inner");
        inner.push(Element::rebelote(10)).push(Element::marker("a"));
        let mut line = Line::new("l");
        line.push(inner).push(Element::rebelote(5)).push(Element::end());
        assert_eq!(line.remove_looping(), 2);
        assert_eq!(line.len(), 2);
        assert!(line.elements().all(|e| e.keyword() != "REBELOTE"));
    }

    #[test]
    fn input_files_propagate_without_duplicates() {
        let mut sub = Line::new("sub");
        sub.push(Element::generic("TOSCA", vec![]).with_input_files(["field.map"]));
        let mut line = Line::new("l");
        line.add_input_files(["field.map", "other.dat"]);
        line.push(sub);
        assert_eq!(
            line.input_files(),
            [PathBuf::from("field.map"), PathBuf::from("other.dat")]
        );
    }

    #[test]
    fn add_input_dir_filters_by_extension_in_name_order() {
        let dir = tempdir().unwrap();
        for name in ["b.map", "a.map", "notes.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("sub.map")).unwrap();

        let mut line = Line::new("l");
        assert_eq!(line.add_input_dir(dir.path(), Some("map")).unwrap(), 2);
        assert_eq!(
            line.input_files(),
            [dir.path().join("a.map"), dir.path().join("b.map")]
        );
    }

    #[test]
    fn display_indents_sub_lines() {
        let mut inner = Line::new("inner");
        inner.push(Element::drift(1.0));
        let mut line = Line::new("top");
        line.push(Element::marker("m1")).push(inner).push(Element::end());
        assert_eq!(line.to_string(), "top\n MARKER m1\n inner\n  DRIFT\n END\n");
    }

    #[test]
    fn clone_starts_with_an_empty_run_registry() {
        let line = nested();
        let copy = line.clone();
        assert_eq!(copy.runs().live_count(), 0);
        assert_eq!(labels(&copy), labels(&line));
    }
}
