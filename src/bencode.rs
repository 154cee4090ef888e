use std::collections::HashMap;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take,
    character::complete::{char, digit1},
    combinator::{opt, recognize},
    multi::many_till,
    sequence::{pair, preceded, terminated},
};

use crate::error::TorrentError;

type BenResult<'a> = IResult<&'a [u8], Value<'a>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Bytes(&'a [u8]),
    Integer(i64),
    List(Vec<Self>),
    /// `raw` is the exact encoded dictionary, `d` through `e`.
    Dictionary {
        entries: HashMap<&'a [u8], Self>,
        raw: &'a [u8],
    },
}

impl<'a> Value<'a> {
    pub fn get(&self, key: &[u8]) -> Option<&Value<'a>> {
        match self {
            Value::Dictionary { entries, .. } => entries.get(key),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self {
            Value::Bytes(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    fn parse_value(inp: &'a [u8]) -> BenResult<'a> {
        alt((
            Self::parse_bytes,
            Self::parse_integer,
            Self::parse_list,
            Self::parse_dict,
        ))
        .parse(inp)
    }

    fn parse_integer(start_inp: &'a [u8]) -> BenResult<'a> {
        let digits: IResult<&[u8], &[u8]> = preceded(
            char('i'),
            terminated(recognize(pair(opt(char('-')), digit1)), char('e')),
        )
        .parse(start_inp);
        let (inp, digits) = digits?;

        // Leading zeros and negative zero are not canonical.
        let canonical = match digits {
            [b'-', b'0', ..] => false,
            [b'0', _, ..] => false,
            _ => true,
        };
        let value = std::str::from_utf8(digits)
            .ok()
            .filter(|_| canonical)
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| fail(start_inp))?;

        Ok((inp, Value::Integer(value)))
    }

    fn parse_bytes(start_inp: &'a [u8]) -> BenResult<'a> {
        let length: IResult<&[u8], &[u8]> = terminated(digit1, char(':')).parse(start_inp);
        let (inp, length) = length?;
        let length = std::str::from_utf8(length)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| fail(start_inp))?;
        let bytes: IResult<&[u8], &[u8]> = take(length).parse(inp);
        let (inp, bytes) = bytes?;
        Ok((inp, Value::Bytes(bytes)))
    }

    fn parse_list(start_inp: &'a [u8]) -> BenResult<'a> {
        let (inp, (items, _)) =
            preceded(char('l'), many_till(Self::parse_value, char('e'))).parse(start_inp)?;
        Ok((inp, Value::List(items)))
    }

    fn parse_dict(start_inp: &'a [u8]) -> BenResult<'a> {
        let (inp, (pairs, _)) = preceded(
            char('d'),
            many_till(pair(Self::parse_bytes, Self::parse_value), char('e')),
        )
        .parse(start_inp)?;

        let mut entries = HashMap::with_capacity(pairs.len());
        for (key, value) in pairs {
            if let Value::Bytes(key) = key {
                entries.insert(key, value);
            }
        }
        let raw = &start_inp[..start_inp.len() - inp.len()];

        Ok((inp, Value::Dictionary { entries, raw }))
    }
}

fn fail(inp: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Failure(nom::error::Error::new(inp, nom::error::ErrorKind::Verify))
}

/// Parses exactly one bencoded value spanning all of `source`.
pub fn parse(source: &[u8]) -> Result<Value<'_>, TorrentError> {
    let (rest, value) =
        Value::parse_value(source).map_err(|e| TorrentError::Bencode(format!("{e:?}")))?;
    if !rest.is_empty() {
        return Err(TorrentError::Bencode(format!(
            "{} trailing bytes",
            rest.len()
        )));
    }
    Ok(value)
}
