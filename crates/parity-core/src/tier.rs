//! Tier classifier: scores how fully a source item is type-annotated.
//!
//! Parses the item into a syntax tree and counts callable definitions,
//! parameter annotations, return annotations and standalone annotated
//! bindings. The resulting tier is a coarse stratification signal; the
//! thresholds are configurable heuristics with no stronger meaning.

use rustpython_parser::{ast, parse, Mode};
use serde::{Deserialize, Serialize};

use crate::domain::{CorpusItem, Tier, TierAssessment, TierError, TierProfile};

/// Heuristic thresholds for tier assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TierThresholds {
    /// Minimum annotation ratio for a well-typed item.
    pub min_ratio: f64,

    /// Whether having at least one parameter and one return annotation is
    /// enough on its own.
    pub accept_param_and_return: bool,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            min_ratio: 0.5,
            accept_param_and_return: true,
        }
    }
}

/// Raw annotation counts gathered from one syntax tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotationCounts {
    pub callables: u32,
    pub parameters: u32,
    pub param_annotations: u32,
    pub return_annotations: u32,
    pub variable_annotations: u32,
}

impl AnnotationCounts {
    pub fn total(&self) -> u32 {
        self.param_annotations + self.return_annotations + self.variable_annotations
    }

    /// Annotations observed over the two expected slots (params + return)
    /// per callable. Without callables: 1.0 if anything is annotated, else 0.0.
    pub fn ratio(&self) -> f64 {
        if self.callables == 0 {
            return if self.total() > 0 { 1.0 } else { 0.0 };
        }
        f64::from(self.total()) / (f64::from(self.callables) * 2.0)
    }

    fn visit_body(&mut self, body: &[ast::Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &ast::Stmt) {
        match stmt {
            ast::Stmt::FunctionDef(def) => {
                self.visit_callable(&def.args, def.returns.is_some());
                self.visit_body(&def.body);
            }
            ast::Stmt::AsyncFunctionDef(def) => {
                self.visit_callable(&def.args, def.returns.is_some());
                self.visit_body(&def.body);
            }
            ast::Stmt::ClassDef(def) => self.visit_body(&def.body),
            ast::Stmt::AnnAssign(_) => self.variable_annotations += 1,
            ast::Stmt::If(s) => {
                self.visit_body(&s.body);
                self.visit_body(&s.orelse);
            }
            ast::Stmt::For(s) => {
                self.visit_body(&s.body);
                self.visit_body(&s.orelse);
            }
            ast::Stmt::AsyncFor(s) => {
                self.visit_body(&s.body);
                self.visit_body(&s.orelse);
            }
            ast::Stmt::While(s) => {
                self.visit_body(&s.body);
                self.visit_body(&s.orelse);
            }
            ast::Stmt::With(s) => self.visit_body(&s.body),
            ast::Stmt::AsyncWith(s) => self.visit_body(&s.body),
            ast::Stmt::Try(s) => {
                self.visit_body(&s.body);
                self.visit_handlers(&s.handlers);
                self.visit_body(&s.orelse);
                self.visit_body(&s.finalbody);
            }
            ast::Stmt::TryStar(s) => {
                self.visit_body(&s.body);
                self.visit_handlers(&s.handlers);
                self.visit_body(&s.orelse);
                self.visit_body(&s.finalbody);
            }
            ast::Stmt::Match(s) => {
                for case in &s.cases {
                    self.visit_body(&case.body);
                }
            }
            _ => {}
        }
    }

    fn visit_handlers(&mut self, handlers: &[ast::ExceptHandler]) {
        for handler in handlers {
            let ast::ExceptHandler::ExceptHandler(handler) = handler;
            self.visit_body(&handler.body);
        }
    }

    fn visit_callable(&mut self, args: &ast::Arguments, has_return: bool) {
        self.callables += 1;
        if has_return {
            self.return_annotations += 1;
        }

        let named = args
            .posonlyargs
            .iter()
            .chain(&args.args)
            .chain(&args.kwonlyargs)
            .map(|a| &a.def);
        let variadic = args.vararg.iter().chain(args.kwarg.iter()).map(|a| a.as_ref());

        for arg in named.chain(variadic) {
            self.parameters += 1;
            if arg.annotation.is_some() {
                self.param_annotations += 1;
            }
        }
    }
}

/// Parses source items and assigns annotation tiers.
#[derive(Debug, Clone, Default)]
pub struct TierClassifier {
    thresholds: TierThresholds,
}

impl TierClassifier {
    pub fn new(thresholds: TierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &TierThresholds {
        &self.thresholds
    }

    /// Count annotations in Python source text.
    pub fn count(&self, source: &str, source_path: &str) -> Result<AnnotationCounts, TierError> {
        let module = parse(source, Mode::Module, source_path).map_err(|e| TierError::Parse {
            path: source_path.to_string(),
            message: e.to_string(),
        })?;

        let mut counts = AnnotationCounts::default();
        if let ast::Mod::Module(module) = &module {
            counts.visit_body(&module.body);
        }
        Ok(counts)
    }

    /// Parse and profile one source text.
    pub fn classify_source(&self, source: &str, source_path: &str) -> Result<TierProfile, TierError> {
        let counts = self.count(source, source_path)?;
        Ok(self.profile(counts))
    }

    /// Assess an item, honouring a manifest tag when present.
    ///
    /// Parse failures are reported in the assessment; they never stop the item
    /// from entering the pipeline.
    pub fn assess(&self, item: &CorpusItem) -> TierAssessment {
        if let Some(tier) = item.tier_tag {
            return TierAssessment::Tagged { tier };
        }
        match self.classify_source(&item.source, &item.id) {
            Ok(profile) => TierAssessment::Classified { profile },
            Err(e) => TierAssessment::ParseError {
                message: e.to_string(),
            },
        }
    }

    /// Apply the classification rule to raw counts.
    pub fn profile(&self, counts: AnnotationCounts) -> TierProfile {
        let ratio = counts.ratio();
        let has_params = counts.param_annotations > 0;
        let has_returns = counts.return_annotations > 0;

        let (tier, reason) = if ratio >= self.thresholds.min_ratio
            || (self.thresholds.accept_param_and_return && has_params && has_returns)
        {
            (
                Tier::Annotated,
                format!(
                    "well typed: ratio {:.2} ({} of {} expected annotations)",
                    ratio,
                    counts.total(),
                    counts.callables * 2
                ),
            )
        } else if counts.total() > 0 {
            (
                Tier::Annotated,
                format!("partially typed: ratio {:.2}", ratio),
            )
        } else {
            (Tier::Unannotated, "no type annotations found".to_string())
        };

        TierProfile {
            callable_count: counts.callables,
            parameter_count: counts.parameters,
            param_annotations: counts.param_annotations,
            return_annotations: counts.return_annotations,
            variable_annotations: counts.variable_annotations,
            annotation_ratio: ratio,
            tier,
            reason,
        }
    }
}
