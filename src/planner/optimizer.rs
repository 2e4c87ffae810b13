//! Rule-based query optimizer.
//!
//! Node rules rewrite one node at a time and are applied top-down until the
//! plan stops changing. Plan rules then see the whole tree once. Rewrites keep
//! the ids of the nodes they move, so callers can correlate nodes of the
//! optimized plan with the plan they passed in.

use log::{debug, trace};

use super::error::PlanResult;
use super::expr::{Expr, LiteralValue};
use super::logical::{JoinType, LogicalPlan};

/// Optimization rule trait.
pub trait OptimizationRule: Send + Sync {
    /// Name of the rule.
    fn name(&self) -> &str;

    /// Apply the rule to a logical plan, returning a potentially optimized plan.
    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan>;
}

/// A rule that rewrites a whole plan in one pass and may fail.
pub trait PlanRule: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, plan: &LogicalPlan) -> PlanResult<LogicalPlan>;
}

/// Predicate pushdown rule - pushes filters closer to data sources.
///
/// Filters never move below a subquery alias, so a predicate stays attached
/// to the name it was written against.
pub struct PredicatePushdown;

impl OptimizationRule for PredicatePushdown {
    fn name(&self) -> &str {
        "PredicatePushdown"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        let LogicalPlan::Filter {
            id: filter_id,
            input,
            predicate,
        } = plan
        else {
            return None;
        };

        match input.as_ref() {
            // Merge consecutive filters.
            LogicalPlan::Filter {
                input: inner_input,
                predicate: inner_pred,
                ..
            } => Some(LogicalPlan::Filter {
                id: *filter_id,
                input: inner_input.clone(),
                predicate: Expr::and(inner_pred.clone(), predicate.clone()),
            }),
            // Push filter below a projection that passes its columns through.
            LogicalPlan::Project {
                id: project_id,
                input: proj_input,
                items,
            } if predicate.references_only(&proj_input.output_ids()) => Some(LogicalPlan::Project {
                id: *project_id,
                input: Box::new(LogicalPlan::Filter {
                    id: *filter_id,
                    input: proj_input.clone(),
                    predicate: predicate.clone(),
                }),
                items: items.clone(),
            }),
            LogicalPlan::Join {
                id: join_id,
                left,
                right,
                join_type,
                on,
            } => {
                let (push_left, push_right) = match join_type {
                    JoinType::Inner | JoinType::Cross => (true, true),
                    JoinType::Left => (true, false),
                    JoinType::Right => (false, true),
                    JoinType::Full => (false, false),
                };
                let left_ids = left.output_ids();
                let right_ids = right.output_ids();

                let mut left_terms = Vec::new();
                let mut right_terms = Vec::new();
                let mut remaining = Vec::new();
                for term in predicate.split_conjunction() {
                    let has_columns = !term.column_refs().is_empty();
                    if has_columns && push_left && term.references_only(&left_ids) {
                        left_terms.push(term.clone());
                    } else if has_columns && push_right && term.references_only(&right_ids) {
                        right_terms.push(term.clone());
                    } else {
                        remaining.push(term.clone());
                    }
                }
                if left_terms.is_empty() && right_terms.is_empty() {
                    return None;
                }

                let wrap = |side: &LogicalPlan, terms: Vec<Expr>| match Expr::conjunction(terms) {
                    Some(p) => LogicalPlan::filter(side.clone(), p),
                    None => side.clone(),
                };
                let join = LogicalPlan::Join {
                    id: *join_id,
                    left: Box::new(wrap(left.as_ref(), left_terms)),
                    right: Box::new(wrap(right.as_ref(), right_terms)),
                    join_type: *join_type,
                    on: on.clone(),
                };
                Some(match Expr::conjunction(remaining) {
                    Some(rest) => LogicalPlan::Filter {
                        id: *filter_id,
                        input: Box::new(join),
                        predicate: rest,
                    },
                    None => join,
                })
            }
            _ => None,
        }
    }
}

/// Collapse a projection over a projection when the outer one only needs
/// columns the inner one's input already has.
pub struct ProjectionMerge;

impl OptimizationRule for ProjectionMerge {
    fn name(&self) -> &str {
        "ProjectionMerge"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        let LogicalPlan::Project { id, input, items } = plan else {
            return None;
        };
        let LogicalPlan::Project {
            input: inner_input, ..
        } = input.as_ref()
        else {
            return None;
        };

        let available = inner_input.output_ids();
        if plan.references().iter().all(|c| available.contains(&c.id)) {
            Some(LogicalPlan::Project {
                id: *id,
                input: inner_input.clone(),
                items: items.clone(),
            })
        } else {
            None
        }
    }
}

/// Limit pushdown - pushes limits as close to sources as possible.
pub struct LimitPushdown;

impl OptimizationRule for LimitPushdown {
    fn name(&self) -> &str {
        "LimitPushdown"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        match plan {
            // Push limit through projection.
            LogicalPlan::Limit {
                id,
                input,
                limit,
                offset,
            } => match input.as_ref() {
                LogicalPlan::Project {
                    id: project_id,
                    input: proj_input,
                    items,
                } => Some(LogicalPlan::Project {
                    id: *project_id,
                    input: Box::new(LogicalPlan::Limit {
                        id: *id,
                        input: proj_input.clone(),
                        limit: *limit,
                        offset: *offset,
                    }),
                    items: items.clone(),
                }),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Constant folding - evaluates constant filters at plan time.
pub struct ConstantFolding;

impl OptimizationRule for ConstantFolding {
    fn name(&self) -> &str {
        "ConstantFolding"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        match plan {
            LogicalPlan::Filter {
                input, predicate, ..
            } => match predicate {
                // If filter is constant true, eliminate it.
                Expr::Literal(LiteralValue::Boolean(true)) => Some(input.as_ref().clone()),
                // Constant false means empty result.
                Expr::Literal(LiteralValue::Boolean(false)) => {
                    Some(LogicalPlan::empty(input.output()))
                }
                _ => None,
            },
            _ => None,
        }
    }
}

/// The query optimizer.
pub struct Optimizer {
    rules: Vec<Box<dyn OptimizationRule>>,
    plan_rules: Vec<Box<dyn PlanRule>>,
    max_iterations: usize,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    /// Create a new optimizer with default rules.
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(ConstantFolding),
                Box::new(PredicatePushdown),
                Box::new(ProjectionMerge),
                Box::new(LimitPushdown),
            ],
            plan_rules: Vec::new(),
            max_iterations: 10,
        }
    }

    /// Bound the number of top-down passes.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Add a custom optimization rule.
    pub fn add_rule(&mut self, rule: Box<dyn OptimizationRule>) {
        self.rules.push(rule);
    }

    /// Add a whole-plan rule, run after the node rules settle.
    pub fn add_plan_rule(&mut self, rule: Box<dyn PlanRule>) {
        self.plan_rules.push(rule);
    }

    /// Optimize a logical plan.
    pub fn optimize(&self, plan: LogicalPlan) -> PlanResult<LogicalPlan> {
        let mut current = self.rewrite(plan)?;
        for rule in &self.plan_rules {
            debug!("applying plan rule {}", rule.name());
            current = rule.apply(&current)?;
        }
        Ok(current)
    }

    /// Apply the node rules until the plan stops changing or the iteration
    /// bound is reached.
    pub fn rewrite(&self, plan: LogicalPlan) -> PlanResult<LogicalPlan> {
        let mut current = plan;

        for iteration in 0..self.max_iterations {
            let mut changed = false;

            // Apply rules recursively to the tree.
            current = self.apply_rules_recursive(current, &mut changed)?;

            if !changed {
                trace!("optimizer reached fixpoint after {} passes", iteration + 1);
                break;
            }
        }

        Ok(current)
    }

    fn apply_rules_recursive(&self, plan: LogicalPlan, changed: &mut bool) -> PlanResult<LogicalPlan> {
        // First, try to apply rules to this node.
        let mut current = plan;

        for rule in &self.rules {
            if let Some(optimized) = rule.apply(&current) {
                trace!("{} rewrote node {}", rule.name(), current.id());
                *changed = true;
                current = optimized;
            }
        }

        // Then, recursively optimize children.
        current.map_children(|child| self.apply_rules_recursive(child, changed))
    }
}
