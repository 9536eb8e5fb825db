//! Random case generation from `input_constraints`

use rand::seq::SliceRandom;
use rand::Rng;

use super::ExprValue;
use crate::core::GradeError;
use crate::rules::{InputConstraints, InputType};

pub const DEFAULT_NUM_CASES: usize = 5;

const DEFAULT_MIN: f64 = 0.0;
const DEFAULT_MAX: f64 = 100.0;
const DEFAULT_MIN_LENGTH: usize = 1;
const DEFAULT_MAX_LENGTH: usize = 10;
const DEFAULT_CHARSET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Draw `count` typed inputs satisfying `constraints`
pub fn generate_inputs<R: Rng + ?Sized>(
    constraints: &InputConstraints,
    count: usize,
    rng: &mut R,
) -> Result<Vec<ExprValue>, GradeError> {
    let min = constraints.min.unwrap_or(DEFAULT_MIN);
    let max = constraints.max.unwrap_or(DEFAULT_MAX);
    if min > max {
        return Err(GradeError::Config(format!(
            "input_constraints: min ({}) is greater than max ({})",
            min, max
        )));
    }

    match constraints.kind {
        InputType::Int => {
            let (low, high) = (min.ceil() as i64, max.floor() as i64);
            if low > high {
                return Err(GradeError::Config(format!(
                    "input_constraints: no integer between {} and {}",
                    min, max
                )));
            }
            Ok((0..count)
                .map(|_| ExprValue::Int(rng.gen_range(low..=high)))
                .collect())
        }
        InputType::Float => Ok((0..count)
            .map(|_| {
                let x: f64 = rng.gen_range(min..=max);
                // Two decimals, but never outside bounds that are off the 0.01 grid
                ExprValue::Float(((x * 100.0).round() / 100.0).clamp(min, max))
            })
            .collect()),
        InputType::Bool => Ok((0..count).map(|_| ExprValue::Bool(rng.gen())).collect()),
        InputType::Str => {
            let min_len = constraints.min_length.unwrap_or(DEFAULT_MIN_LENGTH);
            let max_len = constraints.max_length.unwrap_or(DEFAULT_MAX_LENGTH.max(min_len));
            if min_len > max_len {
                return Err(GradeError::Config(format!(
                    "input_constraints: min_length ({}) is greater than max_length ({})",
                    min_len, max_len
                )));
            }
            let charset: Vec<char> = constraints
                .charset
                .as_deref()
                .unwrap_or(DEFAULT_CHARSET)
                .chars()
                .collect();
            if charset.is_empty() {
                return Err(GradeError::Config("input_constraints: empty charset".to_string()));
            }
            Ok((0..count)
                .map(|_| {
                    let len = rng.gen_range(min_len..=max_len);
                    let text: String = (0..len)
                        .filter_map(|_| charset.choose(rng).copied())
                        .collect();
                    ExprValue::Str(text)
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn constraints(kind: InputType) -> InputConstraints {
        InputConstraints {
            kind,
            ..Default::default()
        }
    }

    #[test]
    fn test_ints_respect_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let c = InputConstraints {
            min: Some(-5.0),
            max: Some(5.0),
            ..constraints(InputType::Int)
        };
        let values = generate_inputs(&c, 50, &mut rng).unwrap();
        assert_eq!(values.len(), 50);
        assert!(values
            .iter()
            .all(|v| matches!(v, ExprValue::Int(i) if (-5..=5).contains(i))));
    }

    #[test]
    fn test_floats_stay_inside_off_grid_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        let c = InputConstraints {
            min: Some(0.123),
            max: Some(0.124),
            ..constraints(InputType::Float)
        };
        for value in generate_inputs(&c, 50, &mut rng).unwrap() {
            let ExprValue::Float(x) = value else {
                panic!("expected float");
            };
            assert!((0.123..=0.124).contains(&x), "{} out of range", x);
        }
    }

    #[test]
    fn test_strings_respect_length_and_charset() {
        let mut rng = StdRng::seed_from_u64(7);
        let c = InputConstraints {
            min_length: Some(2),
            max_length: Some(4),
            charset: Some("xyz".to_string()),
            ..constraints(InputType::Str)
        };
        for value in generate_inputs(&c, 30, &mut rng).unwrap() {
            let ExprValue::Str(s) = value else {
                panic!("expected str");
            };
            assert!((2..=4).contains(&s.chars().count()));
            assert!(s.chars().all(|ch| "xyz".contains(ch)));
        }
    }

    #[test]
    fn test_inverted_bounds_are_config_errors() {
        let mut rng = StdRng::seed_from_u64(1);
        let c = InputConstraints {
            min: Some(10.0),
            max: Some(1.0),
            ..constraints(InputType::Int)
        };
        assert_eq!(generate_inputs(&c, 1, &mut rng).unwrap_err().kind(), "config_error");
    }
}
