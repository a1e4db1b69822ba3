use anyhow::bail;

use crate::error::EngineError;
use crate::value::Value;

/// Left fold of segment results in segment order.
///
/// Seeded with `initial` when given, otherwise with the first result. The
/// reduce function is never assumed to be associative or commutative.
pub fn reduce_all<F>(
    results: Vec<Value>,
    mut reduce: F,
    initial: Option<Value>,
) -> Result<Value, EngineError>
where
    F: FnMut(Value, Value) -> anyhow::Result<Value>,
{
    let mut results = results.into_iter().enumerate();
    let mut acc = match initial {
        Some(initial) => initial,
        None => match results.next() {
            Some((_, first)) => first,
            None => return Err(EngineError::EmptyReduction),
        },
    };
    for (segment, next) in results {
        acc = reduce(acc, next).map_err(|source| EngineError::Reduce { segment, source })?;
    }
    Ok(acc)
}

/// Concatenates two lists. The reducer behind the list-building conveniences.
pub fn concat(acc: Value, next: Value) -> anyhow::Result<Value> {
    match (acc, next) {
        (Value::List(mut acc), Value::List(next)) => {
            acc.extend(next);
            Ok(Value::List(acc))
        }
        (acc, next) => bail!("cannot concatenate {} and {}", acc.kind(), next.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[u64]) -> Value {
        Value::from(items.to_vec())
    }

    #[test]
    fn folds_left_in_segment_order() {
        let results = vec![Value::from("a"), Value::from("b"), Value::from("c")];
        let joined = reduce_all(
            results,
            |acc, next| Ok(Value::from(format!("({}{})", acc.as_str().unwrap(), next.as_str().unwrap()))),
            None,
        )
        .unwrap();
        assert_eq!(joined, Value::from("((ab)c)"));
    }

    #[test]
    fn initial_value_seeds_the_fold() {
        let results = vec![list(&[1, 2]), list(&[3])];
        assert_eq!(
            reduce_all(results, concat, Some(list(&[0]))).unwrap(),
            list(&[0, 1, 2, 3])
        );
    }

    #[test]
    fn nothing_to_reduce() {
        assert!(matches!(
            reduce_all(vec![], concat, None),
            Err(EngineError::EmptyReduction)
        ));
        assert_eq!(reduce_all(vec![], concat, Some(list(&[]))).unwrap(), list(&[]));
    }

    #[test]
    fn reduce_failure_names_the_segment() {
        let results = vec![list(&[1]), list(&[2]), Value::Null];
        let err = reduce_all(results, concat, None).unwrap_err();
        assert_eq!(err.segment(), Some(2));
    }
}
