use super::element::REQUIRES_PARTICLE_DEFINITION;
use super::line::Line;
use thiserror::Error;
use tracing::warn;

/// A structural problem found in a line. None of them prevent serialization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineProblem {
    #[error("First element should be an OBJET")]
    MissingObjet,
    #[error("OBJET found at position {position}; it should only be the first element")]
    MisplacedObjet { position: usize },
    #[error("Element {keyword} at position {position} follows END")]
    ElementAfterEnd { position: usize, keyword: String },
    #[error("Line does not end with END")]
    MissingEnd,
    #[error("Element {keyword} at position {position} requires a PARTICUL before it")]
    MissingParticleDefinition { position: usize, keyword: String },
    #[error("Element {keyword} at position {position} has a zero integration step (XPAS)")]
    ZeroIntegrationStep { position: usize, keyword: String },
}

impl LineProblem {
    /// Zero integration steps are legitimate for some elements; everything else is a
    /// genuine mistake in the line.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LineProblem::ZeroIntegrationStep { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineReport {
    pub problems: Vec<LineProblem>,
}

impl LineReport {
    pub fn is_good(&self) -> bool {
        !self.problems.iter().any(LineProblem::is_fatal)
    }
}

/// Scans the flattened line once and reports every problem found, logging each one.
pub fn check_line(line: &Line) -> LineReport {
    let mut problems = Vec::new();
    let mut has_particle_definition = false;
    let mut end_seen = false;
    let mut count = 0;

    for (position, element) in line.elements().enumerate() {
        count += 1;
        let keyword = element.keyword();

        if position == 0 && !element.is_objet() {
            problems.push(LineProblem::MissingObjet);
        }
        if position > 0 && element.is_objet() {
            problems.push(LineProblem::MisplacedObjet { position });
        }
        if end_seen {
            problems.push(LineProblem::ElementAfterEnd {
                position,
                keyword: keyword.to_string(),
            });
        }
        if element.is_end() {
            end_seen = true;
        }
        if keyword == "PARTICUL" {
            has_particle_definition = true;
        }
        if REQUIRES_PARTICLE_DEFINITION.contains(keyword) && !has_particle_definition {
            problems.push(LineProblem::MissingParticleDefinition {
                position,
                keyword: keyword.to_string(),
            });
        }
        if element.param("XPAS").is_some_and(|step| step.is_zero()) {
            problems.push(LineProblem::ZeroIntegrationStep {
                position,
                keyword: keyword.to_string(),
            });
        }
    }

    if count == 0 {
        problems.push(LineProblem::MissingObjet);
    }
    if !end_seen {
        problems.push(LineProblem::MissingEnd);
    }

    for problem in &problems {
        warn!(line = %line.name(), "{}", problem);
    }
    LineReport { problems }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::input::parse_program;
    use crate::core::models::element::{Element, Param};

    fn elmult(xpas: f64) -> Element {
        Element::generic(
            "ELMULT",
            vec![vec![Param::new("IL", 0)], vec![Param::new("XPAS", xpas)]],
        )
    }

    #[test]
    fn well_formed_line_has_no_problems() {
        let mut line = Line::new("ring");
        line.extend([
            Element::objet5(1000.0),
            Element::particul(938e6, 1.0),
            elmult(1.0),
            Element::end(),
        ]);
        let report = check_line(&line);
        assert!(report.problems.is_empty());
        assert!(report.is_good());
    }

    #[test]
    fn empty_line_misses_objet_and_end() {
        let report = check_line(&Line::new("empty"));
        assert_eq!(
            report.problems,
            vec![LineProblem::MissingObjet, LineProblem::MissingEnd]
        );
    }

    #[test]
    fn every_violation_is_reported() {
        let mut line = Line::new("bad");
        line.extend([
            Element::marker("m"),
            elmult(1.0),
            Element::objet5(1000.0),
            Element::end(),
            Element::drift(1.0),
        ]);
        let report = check_line(&line);
        assert_eq!(
            report.problems,
            vec![
                LineProblem::MissingObjet,
                LineProblem::MissingParticleDefinition {
                    position: 1,
                    keyword: "ELMULT".to_string()
                },
                LineProblem::MisplacedObjet { position: 2 },
                LineProblem::ElementAfterEnd {
                    position: 4,
                    keyword: "DRIFT".to_string()
                },
            ]
        );
        assert!(!report.is_good());
    }

    #[test]
    fn zero_step_is_reported_but_not_fatal() {
        let mut line = Line::new("ring");
        line.extend([
            Element::objet5(1000.0),
            Element::particul(938e6, 1.0),
            elmult(0.0),
            Element::end(),
        ]);
        let report = check_line(&line);
        assert_eq!(
            report.problems,
            vec![LineProblem::ZeroIntegrationStep {
                position: 2,
                keyword: "ELMULT".to_string()
            }]
        );
        assert!(report.is_good());
    }

    #[test]
    fn nested_elements_are_checked_in_flattened_order() {
        let mut cell = Line::new("cell");
        cell.push(elmult(1.0));
        let mut line = Line::new("ring");
        line.push(Element::objet5(1000.0))
            .push(cell)
            .push(Element::particul(938e6, 1.0))
            .push(Element::end());
        assert_eq!(
            check_line(&line).problems,
            vec![LineProblem::MissingParticleDefinition {
                position: 1,
                keyword: "ELMULT".to_string()
            }]
        );
    }

    #[test]
    fn ready_made_programs_see_their_particle_definition() {
        let text = "ring\n\
            'OBJET'\n1000.\n5\n0.1 0.1 0.1 0.1 0. 0.0001\n0. 0. 0. 0. 0. 1.\n\
            'PARTICUL'\n938.27203 1.602176487E-19 1.79284735 0. 0.\n\
            'ELMULT'\n0\n10. 5. 0. 0. 0. 0. 0. 0. 0. 0. 0.\n1.\n1 0. 0. 0.\n\
            'END'\n";
        let line = parse_program(text, "x");
        assert_eq!(line.len(), 4);
        assert!(check_line(&line).problems.is_empty());

        let without = parse_program(
            "ring\n'OBJET'\n1000.\n5\n'ELMULT'\n0\n1.\n'END'\n",
            "x",
        );
        assert_eq!(
            check_line(&without).problems,
            vec![LineProblem::MissingParticleDefinition {
                position: 1,
                keyword: "ELMULT".to_string()
            }]
        );
    }
}
