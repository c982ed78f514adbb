//! Evaluate style expressions. The syntax follows MapLibre's expressions
//! <https://maplibre.org/maplibre-style-spec/expressions/>, extended with `param` for runtime
//! style parameters and with comparison and arithmetic operators used by compiled filters.

use color::{AlphaColor, HueDirection, Srgb};
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashMap};

use crate::value::Value as FeatureValue;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid expression: {0:?}")]
    InvalidExpression(Value),
    #[error("Expected a property name or an expression, got: {0:?}")]
    ExpectedKeyOrExpression(Value),
    #[error("Interpolate stop not found for input value: {0}. Expression: {1}")]
    InterpolateStopNotFound(Value, Value),
    #[error("Cannot interpolate between values: {0} and {1}")]
    CannotInterpolate(Value, Value),
    #[error("No arm matched in: {0}")]
    NoMatch(Value),
    #[error("Single string expected, got: {0:?}")]
    SingleStringExpected(Vec<Value>),
    #[error("Single array expected, got: {0:?}")]
    SingleArrayExpected(Vec<Value>),
    #[error("Single value expected, got: {0:?}")]
    SingleValueExpected(Vec<Value>),
    #[error("Exactly two elemented expected, got: {0:?}")]
    TwoElementsExpected(Vec<Value>),
    #[error("At least two elemented expected, got: {0:?}")]
    AtLeastTwoElementsExpected(Vec<Value>),
    #[error("Property '{0}' missing")]
    PropertyMissing(String),
    #[error("Style parameter '{0}' is not declared")]
    UnknownParameter(String),
    #[error("Value must be a number, got: {0}")]
    ExpectedNumber(Value),
    #[error("Number must be a float, got: {0}")]
    ExpectedFloat(Number),
    #[error("Could not serialize a float. Is it NaN?")]
    CouldNotSerializeFloat,
    #[error(transparent)]
    ColorParse(color::ParseError),
}

/// What an expression is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub properties: &'a HashMap<String, FeatureValue>,
    pub zoom: u8,
    pub parameters: &'a BTreeMap<String, FeatureValue>,
}

impl<'a> Context<'a> {
    pub fn new(
        properties: &'a HashMap<String, FeatureValue>,
        zoom: u8,
        parameters: &'a BTreeMap<String, FeatureValue>,
    ) -> Self {
        Self {
            properties,
            zoom,
            parameters,
        }
    }

    fn property(&self, key: &str) -> Option<Value> {
        self.properties.get(key).map(FeatureValue::to_json)
    }
}

/// Evaluate a style expression.
pub fn evaluate(value: &Value, context: &Context<'_>) -> Result<Value, Error> {
    match value {
        Value::Array(values) => {
            let Some((Value::String(operator), arguments)) = values.split_first() else {
                return Err(Error::InvalidExpression(value.clone()));
            };

            match operator.as_str() {
                "zoom" => Ok(Value::Number((context.zoom as i64).into())),
                "literal" => single_array(arguments),
                "!" => match evaluate(&single_value(arguments)?, context)? {
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    _ => Err(Error::InvalidExpression(value.clone())),
                },
                "get" => {
                    let key = single_string(arguments)?;
                    Ok(context.property(key).unwrap_or(Value::Null))
                }
                "param" => {
                    let name = single_string(arguments)?;
                    context
                        .parameters
                        .get(name)
                        .map(FeatureValue::to_json)
                        .ok_or_else(|| Error::UnknownParameter(name.to_owned()))
                }
                "has" => Ok(Value::Bool(
                    context.properties.contains_key(single_string(arguments)?),
                )),
                "!has" => Ok(Value::Bool(
                    !context.properties.contains_key(single_string(arguments)?),
                )),
                "match" => {
                    let (value, arms) = first_and_rest(arguments)?;
                    let evaluated_value = evaluate(value, context)?;
                    for arm in arms.chunks(2) {
                        match arm {
                            [label, result] => {
                                let hit = match label {
                                    Value::Array(labels) => {
                                        labels.iter().any(|l| equal(&evaluated_value, l))
                                    }
                                    _ => equal(&evaluated_value, label),
                                };
                                if hit {
                                    return evaluate(result, context);
                                }
                            }
                            [default] => return evaluate(default, context),
                            _ => break,
                        }
                    }
                    Err(Error::NoMatch(value.clone()))
                }
                "case" => {
                    for arm in arguments.chunks(2) {
                        match arm {
                            [condition, value] => {
                                if let Value::Bool(true) = evaluate(condition, context)? {
                                    return evaluate(value, context);
                                }
                            }
                            [default] => return evaluate(default, context),
                            _ => break,
                        }
                    }
                    Err(Error::NoMatch(value.clone()))
                }
                "coalesce" => {
                    for argument in arguments {
                        match evaluate(argument, context)? {
                            Value::Null => continue,
                            non_null => return Ok(non_null),
                        }
                    }
                    Ok(Value::Null)
                }
                "in" => {
                    let (value, list) = first_and_rest(arguments)?;
                    let value = property_or_expression(value, context)?;

                    for item in list {
                        if equal(&value, &evaluate(item, context)?) {
                            return Ok(Value::Bool(true));
                        }
                    }

                    Ok(Value::Bool(false))
                }
                "==" | "!=" => {
                    let (left, right) = two_elements(arguments)?;
                    let left = property_or_expression(left, context)?;
                    let right = evaluate(right, context)?;
                    Ok(Value::Bool(equal(&left, &right) == (operator == "==")))
                }
                "<" | "<=" | ">" | ">=" => {
                    let (left, right) = two_elements(arguments)?;
                    let left = property_or_expression(left, context)?;
                    let right = evaluate(right, context)?;
                    Ok(Value::Bool(match operator.as_str() {
                        "<" => lt(&left, &right),
                        "<=" => lte(&left, &right),
                        ">" => lt(&right, &left),
                        _ => lte(&right, &left),
                    }))
                }
                "any" => Ok(arguments
                    .iter()
                    .try_fold(false, |acc, value| {
                        Ok(acc || evaluate(value, context)? == Value::Bool(true))
                    })?
                    .into()),
                "all" => Ok(arguments
                    .iter()
                    .try_fold(true, |acc, value| {
                        Ok(acc && evaluate(value, context)? == Value::Bool(true))
                    })?
                    .into()),
                "+" | "-" | "*" | "/" | "%" => {
                    let (left, right) = two_elements(arguments)?;
                    let (left, right) = (evaluate(left, context)?, evaluate(right, context)?);
                    if operator == "+" && (left.is_string() || right.is_string()) {
                        return Ok(Value::String(text(&left) + &text(&right)));
                    }
                    let (left, right) = (float(&left)?, float(&right)?);
                    let result = match operator.as_str() {
                        "+" => left + right,
                        "-" => left - right,
                        "*" => left * right,
                        "/" => left / right,
                        _ => left % right,
                    };
                    Number::from_f64(result)
                        .map(Value::Number)
                        .ok_or(Error::CouldNotSerializeFloat)
                }
                "concat" | "format" => {
                    let step = if operator == "format" { 2 } else { 1 };
                    let mut result = String::new();
                    for argument in arguments.iter().step_by(step) {
                        result.push_str(&text(&evaluate(argument, context)?));
                    }
                    Ok(Value::String(result))
                }
                "interpolate" => {
                    let (_interpolation_type, args) = first_and_rest(arguments)?;
                    let (input, stops) = first_and_rest(args)?;
                    let input = evaluate(input, context)?;

                    // Stops are pairs of [input, output].
                    let stops = stops
                        .chunks(2)
                        .filter_map(|chunk| match chunk {
                            [stop, output] => Some((stop.clone(), output.clone())),
                            _ => None,
                        })
                        .collect::<Vec<_>>();

                    let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
                        return Err(Error::InvalidExpression(value.clone()));
                    };

                    // Find the two stops surrounding the input value.
                    let stop_pair = stops.windows(2).find(|pair| {
                        let left_stop = &pair[0].0;
                        let right_stop = &pair[1].0;
                        lte(left_stop, &input) && lte(&input, right_stop)
                    });

                    if let Some(stop_pair) = stop_pair {
                        let input_delta = numeric_difference(&stop_pair[1].0, &stop_pair[0].0)?;

                        // Position of the input value between the two stops (0.0 to 1.0).
                        let input_position =
                            numeric_difference(&input, &stop_pair[0].0)? / input_delta;

                        lerp(&stop_pair[0].1, &stop_pair[1].1, input_position)
                    } else if lt(&input, &first.0) {
                        Ok(first.1.clone())
                    } else if lt(&last.0, &input) {
                        Ok(last.1.clone())
                    } else {
                        Err(Error::InterpolateStopNotFound(input, value.clone()))
                    }
                }
                _ => Err(Error::InvalidExpression(value.clone())),
            }
        }
        primitive => Ok(primitive.clone()),
    }
}

/// Text form of a value as used in labels. Null is empty.
fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Equality treating integers and floats of the same magnitude as equal.
fn equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
        _ => left == right,
    }
}

/// Expect a float Value.
fn float(v: &Value) -> Result<f64, Error> {
    if let Value::Number(n) = v {
        n.as_f64().ok_or(Error::ExpectedFloat(n.clone()))
    } else {
        Err(Error::ExpectedNumber(v.clone()))
    }
}

/// Linear interpolation between two Values (Numbers or Strings representing colors).
fn lerp(a: &Value, b: &Value, t: f64) -> Result<Value, Error> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => {
            let a: AlphaColor<Srgb> = a.parse().map_err(Error::ColorParse)?;
            let b: AlphaColor<Srgb> = b.parse().map_err(Error::ColorParse)?;
            let color = a.lerp(b, t as f32, HueDirection::default());
            Ok(Value::String(color.to_rgba8().to_string()))
        }
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().ok_or(Error::ExpectedFloat(a.clone()))?;
            let b = b.as_f64().ok_or(Error::ExpectedFloat(b.clone()))?;
            Ok(Value::Number(
                Number::from_f64(a + (b - a) * t).ok_or(Error::CouldNotSerializeFloat)?,
            ))
        }
        _ => Err(Error::CannotInterpolate(a.clone(), b.clone())),
    }
}

fn numeric_difference(left: &Value, right: &Value) -> Result<f64, Error> {
    Ok(float(left)? - float(right)?)
}

/// Less than comparison for Numbers and Strings.
fn lt(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() < r.as_f64(),
        (Value::String(l), Value::String(r)) => l < r,
        _ => false,
    }
}

/// Less than or equal comparison for Numbers and Strings.
fn lte(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() <= r.as_f64(),
        (Value::String(l), Value::String(r)) => l <= r,
        _ => false,
    }
}

/// Evaluate token as either a property key (String), an expression (Array) or a literal.
fn property_or_expression(value: &Value, context: &Context<'_>) -> Result<Value, Error> {
    match value {
        Value::String(key) => context
            .property(key)
            .ok_or_else(|| Error::PropertyMissing(key.clone())),
        Value::Array(_) => evaluate(value, context),
        Value::Object(_) => Err(Error::ExpectedKeyOrExpression(value.clone())),
        primitive => Ok(primitive.clone()),
    }
}

/// Expect exactly one string element.
fn single_string(values: &[Value]) -> Result<&str, Error> {
    if let [Value::String(s)] = values {
        Ok(s)
    } else {
        Err(Error::SingleStringExpected(values.to_vec()))
    }
}

/// Expect exactly one array element.
fn single_array(values: &[Value]) -> Result<Value, Error> {
    match values {
        [arr] if arr.is_array() => Ok(arr.clone()),
        _ => Err(Error::SingleArrayExpected(values.to_vec())),
    }
}

/// Expect exactly one element.
fn single_value(values: &[Value]) -> Result<Value, Error> {
    match values {
        [value] => Ok(value.clone()),
        _ => Err(Error::SingleValueExpected(values.to_vec())),
    }
}

/// Expect exactly two elements.
fn two_elements(slice: &[Value]) -> Result<(&Value, &Value), Error> {
    if let [a, b] = slice {
        Ok((a, b))
    } else {
        Err(Error::TwoElementsExpected(slice.to_vec()))
    }
}

/// Expect two or more elements.
fn first_and_rest(slice: &[Value]) -> Result<(&Value, &[Value]), Error> {
    slice
        .split_first()
        .ok_or(Error::AtLeastTwoElementsExpected(slice.to_vec()))
}
