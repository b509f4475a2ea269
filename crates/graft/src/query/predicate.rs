//! Compiles raw predicate descriptors into per-pattern filters and property
//! maps. Every descriptor is validated when the query is built.

use std::rc::Rc;

use graft_core::PredicateStepType;
use indexmap::IndexMap;
use regex_automata::meta::Regex;

use crate::error::PredicateError;
use crate::native::PredicateStep;
use crate::query::QueryCapture;

/// Properties recorded by `#set!`, `#is?` or `#is-not?`, in predicate order.
pub type Properties = IndexMap<String, Option<String>>;

/// Right-hand side of an `#eq?`.
#[derive(Debug)]
pub(crate) enum Operand {
    Capture(String),
    Text(String),
}

/// A predicate that filters matches by capture text.
#[derive(Debug)]
pub(crate) enum TextPredicate {
    Eq {
        capture: String,
        operand: Operand,
        positive: bool,
    },
    Match {
        capture: String,
        regex: Regex,
    },
}

impl TextPredicate {
    /// Whether a match with these captures passes.
    ///
    /// A referenced capture that is absent from the match passes vacuously.
    pub(crate) fn evaluate(&self, captures: &[QueryCapture]) -> bool {
        match self {
            TextPredicate::Eq {
                capture,
                operand: Operand::Capture(other),
                positive,
            } => {
                let mut first = None;
                let mut second = None;
                for c in captures {
                    if *c.name == **capture {
                        first = Some(&c.node);
                    }
                    if *c.name == **other {
                        second = Some(&c.node);
                    }
                }
                match (first, second) {
                    (Some(a), Some(b)) => (a.text() == b.text()) == *positive,
                    _ => true,
                }
            }
            TextPredicate::Eq {
                capture,
                operand: Operand::Text(value),
                positive,
            } => captures
                .iter()
                .find(|c| *c.name == **capture)
                .is_none_or(|c| (c.node.text() == *value) == *positive),
            TextPredicate::Match { capture, regex } => captures
                .iter()
                .find(|c| *c.name == **capture)
                .is_none_or(|c| regex.is_match(&c.node.text())),
        }
    }
}

/// Everything the predicates of one pattern compile to.
#[derive(Debug, Default)]
pub(crate) struct PatternPredicates {
    pub(crate) filters: Vec<TextPredicate>,
    pub(crate) set_properties: Option<Rc<Properties>>,
    pub(crate) asserted_properties: Option<Rc<Properties>>,
    pub(crate) refuted_properties: Option<Rc<Properties>>,
}

impl PatternPredicates {
    pub(crate) fn accepts(&self, captures: &[QueryCapture]) -> bool {
        self.filters.iter().all(|p| p.evaluate(captures))
    }
}

/// Compile the descriptors of every pattern, in pattern order.
pub(crate) fn compile(
    descriptors: &[Vec<PredicateStep>],
) -> Result<Vec<PatternPredicates>, PredicateError> {
    descriptors.iter().map(|steps| compile_pattern(steps)).collect()
}

fn compile_pattern(steps: &[PredicateStep]) -> Result<PatternPredicates, PredicateError> {
    let mut filters = Vec::new();
    let mut set = None;
    let mut asserted = None;
    let mut refuted = None;

    for predicate in split_predicates(steps) {
        let Some((first, args)) = predicate
            .split_first()
            .filter(|(first, _)| first.kind == PredicateStepType::String)
        else {
            return Err(PredicateError::MustBeginWithLiteral);
        };

        match first.value.as_str() {
            "eq?" => filters.push(compile_eq(args, true)?),
            "not-eq?" => filters.push(compile_eq(args, false)?),
            "match?" => filters.push(compile_match(args)?),
            "set!" => record_property(set.get_or_insert_with(Properties::new), "set!", args)?,
            "is?" => record_property(asserted.get_or_insert_with(Properties::new), "is?", args)?,
            "is-not?" => {
                record_property(refuted.get_or_insert_with(Properties::new), "is-not?", args)?
            }
            operator => return Err(PredicateError::UnknownOperator(operator.to_owned())),
        }
    }

    Ok(PatternPredicates {
        filters,
        set_properties: set.map(Rc::new),
        asserted_properties: asserted.map(Rc::new),
        refuted_properties: refuted.map(Rc::new),
    })
}

/// Split a flat step list at `Done` steps.
///
/// A trailing predicate without its terminator still counts.
fn split_predicates(steps: &[PredicateStep]) -> Vec<&[PredicateStep]> {
    let mut predicates = Vec::new();
    let mut start = 0;
    for (i, step) in steps.iter().enumerate() {
        if step.kind == PredicateStepType::Done {
            predicates.push(&steps[start..i]);
            start = i + 1;
        }
    }
    if start < steps.len() {
        predicates.push(&steps[start..]);
    }
    predicates
}

fn compile_eq(args: &[PredicateStep], positive: bool) -> Result<TextPredicate, PredicateError> {
    let [first, second] = args else {
        return Err(PredicateError::EqArity(args.len()));
    };
    if first.kind != PredicateStepType::Capture {
        return Err(PredicateError::EqFirstArgument(first.value.clone()));
    }
    let operand = match second.kind {
        PredicateStepType::Capture => Operand::Capture(second.value.clone()),
        _ => Operand::Text(second.value.clone()),
    };
    Ok(TextPredicate::Eq {
        capture: first.value.clone(),
        operand,
        positive,
    })
}

fn compile_match(args: &[PredicateStep]) -> Result<TextPredicate, PredicateError> {
    let [first, second] = args else {
        return Err(PredicateError::MatchArity(args.len()));
    };
    if first.kind != PredicateStepType::Capture {
        return Err(PredicateError::MatchFirstArgument(first.value.clone()));
    }
    if second.kind != PredicateStepType::String {
        return Err(PredicateError::MatchSecondArgument(second.value.clone()));
    }
    let regex = Regex::new(&second.value).map_err(|err| PredicateError::InvalidRegex {
        pattern: second.value.clone(),
        message: err.to_string(),
    })?;
    Ok(TextPredicate::Match {
        capture: first.value.clone(),
        regex,
    })
}

fn record_property(
    properties: &mut Properties,
    operator: &str,
    args: &[PredicateStep],
) -> Result<(), PredicateError> {
    if args.is_empty() || args.len() > 2 {
        return Err(PredicateError::PropertyArity {
            operator: operator.to_owned(),
            got: args.len(),
        });
    }
    if args.iter().any(|arg| arg.kind != PredicateStepType::String) {
        return Err(PredicateError::PropertyArguments(operator.to_owned()));
    }
    properties.insert(args[0].value.clone(), args.get(1).map(|arg| arg.value.clone()));
    Ok(())
}
