use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, internal};
use crate::expr::ScalarExpr;
use crate::plan::{Filter, Join, JoinType, LogicalPlan};

/// Hint naming a join input that filters should be pushed into.
///
/// Offsets are column positions in the output of the join a filter sits on.
/// The input covers columns `input_start..input_next`. `input_prev` is the
/// start of the input before it, or negative for the first input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPushDownHint {
    pub input_prev: i64,
    pub input_start: i64,
    pub input_next: i64,
}

impl FilterPushDownHint {
    /// The hinted column range, if the hint is well formed.
    fn range(&self) -> Option<(usize, usize)> {
        let start = usize::try_from(self.input_start).ok()?;
        let next = usize::try_from(self.input_next).ok()?;
        (self.input_prev < self.input_start && start < next).then_some((start, next))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Push conjuncts of filters sitting on inner joins into the join inputs named
/// by the hints.
///
/// A conjunct moves when every column it references falls within a hinted
/// input range, and that range lies entirely within one side of the join.
pub fn push_down_filters(plan: LogicalPlan, hints: &[FilterPushDownHint]) -> Result<LogicalPlan> {
    let ranges: Vec<_> = hints
        .iter()
        .filter_map(|hint| {
            let range = hint.range();
            if range.is_none() {
                debug!(?hint, "ignoring malformed filter push down hint");
            }
            range
        })
        .collect();
    if ranges.is_empty() {
        return Ok(plan);
    }
    rewrite(plan, &ranges, 0)
}

/// Rewrite a subtree whose first column sits at `base` in hint coordinates.
fn rewrite(plan: LogicalPlan, ranges: &[(usize, usize)], base: usize) -> Result<LogicalPlan> {
    match plan {
        LogicalPlan::Filter(filter) if is_inner_join(&filter.input) => {
            push_filter(filter, ranges, base)
        }
        other => other.map_children(&mut |child| rewrite(child, ranges, 0)),
    }
}

fn is_inner_join(plan: &LogicalPlan) -> bool {
    matches!(plan, LogicalPlan::Join(join) if join.join_type == JoinType::Inner)
}

fn push_filter(filter: Filter, ranges: &[(usize, usize)], base: usize) -> Result<LogicalPlan> {
    let LogicalPlan::Join(join) = *filter.input else {
        return Err(internal!("expected join below filter"));
    };
    let left_width = join.left.num_columns()?;
    let right_width = join.right.num_columns()?;

    let mut keep = Vec::new();
    let mut to_left = Vec::new();
    let mut to_right = Vec::new();
    for conjunct in filter.condition.split_conjunction() {
        let refs = conjunct.references();
        match target_side(&refs, ranges, base, left_width, right_width) {
            Some(Side::Left) => to_left.push(conjunct),
            Some(Side::Right) => to_right.push(conjunct.shift(-(left_width as isize))),
            None => keep.push(conjunct),
        }
    }

    let left = wrap(*join.left, to_left, ranges, base)?;
    let right = wrap(*join.right, to_right, ranges, base + left_width)?;
    let join = LogicalPlan::Join(Join {
        join_type: join.join_type,
        condition: join.condition,
        left: Box::new(left),
        right: Box::new(right),
    });

    Ok(match ScalarExpr::and_all(keep) {
        Some(condition) => LogicalPlan::Filter(Filter {
            condition,
            input: Box::new(join),
        }),
        None => join,
    })
}

fn target_side(
    refs: &BTreeSet<usize>,
    ranges: &[(usize, usize)],
    base: usize,
    left_width: usize,
    right_width: usize,
) -> Option<Side> {
    let (min, max) = (*refs.first()?, *refs.last()?);
    ranges.iter().find_map(|&(start, next)| {
        let start = start.checked_sub(base)?;
        let next = next - base;
        if min < start || max >= next {
            return None;
        }
        if next <= left_width {
            Some(Side::Left)
        } else if start >= left_width && next <= left_width + right_width {
            Some(Side::Right)
        } else {
            None
        }
    })
}

fn wrap(
    input: LogicalPlan,
    conjuncts: Vec<ScalarExpr>,
    ranges: &[(usize, usize)],
    base: usize,
) -> Result<LogicalPlan> {
    match ScalarExpr::and_all(conjuncts) {
        Some(condition) => rewrite(
            LogicalPlan::Filter(Filter {
                condition,
                input: Box::new(input),
            }),
            ranges,
            base,
        ),
        None => rewrite(input, ranges, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinaryOperator;
    use crate::rules::testutil::scan;
    use crate::types::ScalarValue;

    fn gt(col: usize, n: i64) -> ScalarExpr {
        ScalarExpr::binary(
            BinaryOperator::Gt,
            ScalarExpr::column(col),
            ScalarExpr::literal(ScalarValue::Int64(n)),
        )
    }

    fn filtered_join() -> LogicalPlan {
        LogicalPlan::Filter(Filter {
            condition: ScalarExpr::and(
                ScalarExpr::and(gt(0, 1), gt(3, 2)),
                ScalarExpr::binary(
                    BinaryOperator::Eq,
                    ScalarExpr::column(1),
                    ScalarExpr::column(2),
                ),
            ),
            input: Box::new(LogicalPlan::Join(Join {
                join_type: JoinType::Inner,
                condition: ScalarExpr::boolean(true),
                left: Box::new(scan("a", &["x", "y"])),
                right: Box::new(scan("b", &["z", "w"])),
            })),
        })
    }

    #[test]
    fn no_hints_is_identity() {
        let plan = filtered_join();
        assert_eq!(plan.clone(), push_down_filters(plan, &[]).unwrap());
    }

    #[test]
    fn push_into_right() {
        let hint = FilterPushDownHint {
            input_prev: 0,
            input_start: 2,
            input_next: 4,
        };
        let out = push_down_filters(filtered_join(), &[hint]).unwrap();
        let expected = "\
LogicalFilter(condition=[AND(>($0, 1), =($1, $2))])
  LogicalJoin(condition=[true], joinType=[inner])
    LogicalTableScan(table=[[db, a]])
    LogicalFilter(condition=[>($1, 2)])
      LogicalTableScan(table=[[db, b]])
";
        assert_eq!(expected, out.explain());
    }

    #[test]
    fn push_into_both() {
        let hints = [
            FilterPushDownHint {
                input_prev: -1,
                input_start: 0,
                input_next: 2,
            },
            FilterPushDownHint {
                input_prev: 0,
                input_start: 2,
                input_next: 4,
            },
        ];
        let out = push_down_filters(filtered_join(), &hints).unwrap();
        let expected = "\
LogicalFilter(condition=[=($1, $2)])
  LogicalJoin(condition=[true], joinType=[inner])
    LogicalFilter(condition=[>($0, 1)])
      LogicalTableScan(table=[[db, a]])
    LogicalFilter(condition=[>($1, 2)])
      LogicalTableScan(table=[[db, b]])
";
        assert_eq!(expected, out.explain());
    }

    #[test]
    fn malformed_hint_ignored() {
        let hint = FilterPushDownHint {
            input_prev: 3,
            input_start: 2,
            input_next: 4,
        };
        let plan = filtered_join();
        assert_eq!(plan.clone(), push_down_filters(plan, &[hint]).unwrap());
    }
}
