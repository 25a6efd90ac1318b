use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{map, opt},
    multi::separated_list1,
    sequence::{delimited, preceded, tuple},
    IResult,
};

use crate::models::{Port, Ship, Trader};

/// Parses a game-formatted integer, tolerating thousands separators.
/// Returns `None` (caller keeps the prior value) on anything malformed.
#[must_use]
pub fn parse_number(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    cleaned.parse().ok()
}

/// `Sector  : 2934 in The Federation.`
#[must_use]
pub fn parse_sector_header(line: &str) -> Option<(i64, String)> {
    let rest = line.strip_prefix("Sector  :")?.trim_start();

    let (number, constellation) = match rest.split_once(" in ") {
        Some((number, constellation)) => (number, constellation.trim().trim_end_matches('.')),
        None => (rest, ""),
    };

    Some((parse_number(number)?, constellation.to_string()))
}

fn warp_entry(input: &str) -> IResult<&str, i64> {
    map(
        alt((
            delimited(
                char('('),
                delimited(multispace0, take_while1(|c: char| c.is_ascii_digit()), multispace0),
                char(')'),
            ),
            take_while1(|c: char| c.is_ascii_digit()),
        )),
        |digits: &str| digits.parse().unwrap_or(0),
    )(input)
}

/// `Warps to Sector(s) :  (240) - 241 - 243 - 244 - (500) - 572`
///
/// Parenthesised entries are warps into unexplored space; the distinction
/// belongs to the display, not the record.
#[must_use]
pub fn parse_warp_line(line: &str) -> Option<Vec<i64>> {
    let parser = preceded(
        tuple((tag("Warps to Sector(s) :"), multispace0)),
        separated_list1(tuple((multispace0, char('-'), multispace0)), warp_entry),
    );

    let (_, warps) = map(parser, |warps| warps)(line).ok()?;
    Some(warps)
}

/// `Ports   : Ozark Mega Mall, Class 0 (Special)`
#[must_use]
pub fn parse_port_header(line: &str) -> Option<(String, i16)> {
    let rest = line.strip_prefix("Ports   :")?.trim_start();
    let (name, class_part) = rest.rsplit_once(", Class ")?;

    let class_digits: String = class_part
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();

    Some((name.trim().to_string(), class_digits.parse().ok()?))
}

/// One line of the commerce report body, e.g.
/// `Fuel Ore   Buying    3000    100%       0`.
#[must_use]
pub fn parse_commerce_line(line: &str) -> Option<(usize, bool, i64, i64)> {
    let trimmed = line.trim_start();

    let (index, rest) = if let Some(rest) = trimmed.strip_prefix("Fuel Ore") {
        (0, rest)
    } else if let Some(rest) = trimmed.strip_prefix("Organics") {
        (1, rest)
    } else if let Some(rest) = trimmed.strip_prefix("Equipment") {
        (2, rest)
    } else {
        return None;
    };

    let mut fields = rest.split_whitespace();
    let buying = match fields.next()? {
        "Buying" => true,
        "Selling" => false,
        _ => return None,
    };

    let amount = parse_number(fields.next()?)?;
    let percent = parse_number(fields.next()?.trim_end_matches('%'))?;

    Some((index, buying, amount, percent))
}

/// Applies one commerce line to a port under construction, returning whether
/// all three commodities have now been seen.
pub fn apply_commerce_line(port: &mut Port, seen: &mut [bool; 3], line: &str) -> bool {
    if let Some((index, buying, amount, percent)) = parse_commerce_line(line) {
        port.buying[index] = buying;
        port.amounts[index] = amount;
        port.percents[index] = percent;
        seen[index] = true;
    }

    seen.iter().all(|s| *s)
}

/// `Civilian phil, w/ 30 ftrs,` optionally prefixed by `Traders : `.
#[must_use]
pub fn parse_trader_head(line: &str) -> Option<Trader> {
    let rest = line
        .strip_prefix("Traders :")
        .map_or(line, |rest| rest)
        .trim();

    let (name, tail) = rest.split_once(", w/ ")?;
    let figs = parse_number(tail.split_whitespace().next()?)?;

    Some(Trader {
        name: name.trim().to_string(),
        ship_name: String::new(),
        ship_type: String::new(),
        figs,
    })
}

/// `in Star Stomper (Sverdlov Merchant Cruiser)` -- the continuation line
/// naming the trader's ship.
#[must_use]
pub fn parse_trader_ship(line: &str) -> Option<(String, String)> {
    let rest = line.trim().strip_prefix("in ")?;

    let (open, _) = rest.char_indices().rev().find(|(_, c)| *c == '(')?;
    let ship_name = rest[..open].trim().to_string();
    let ship_type = rest[open + 1..].trim_end_matches(')').trim().to_string();

    Some((ship_name, ship_type))
}

/// `Enterprise [Owned by] Kirk, w/ 10 ftrs,` optionally prefixed by
/// `Ships   : `.
#[must_use]
pub fn parse_ship_head(line: &str) -> Option<Ship> {
    let rest = line
        .strip_prefix("Ships   :")
        .map_or(line, |rest| rest)
        .trim();

    let (name, tail) = rest.split_once(" [Owned by] ")?;
    let (owner, figs_part) = tail.split_once(", w/ ")?;
    let figs = parse_number(figs_part.split_whitespace().next()?)?;

    Some(Ship {
        name: name.trim().to_string(),
        owner: owner.trim().to_string(),
        ship_type: String::new(),
        figs,
    })
}

/// `(Federation Starship)` -- the continuation line naming a ship's class.
#[must_use]
pub fn parse_ship_type(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.starts_with('(') && trimmed.ends_with(')') {
        Some(trimmed[1..trimmed.len() - 1].trim().to_string())
    } else {
        None
    }
}

/// `(M) Terra` or a bare planet name on a continuation line.
#[must_use]
pub fn parse_planet(line: &str) -> Option<String> {
    let rest = line
        .strip_prefix("Planets :")
        .map_or(line, |rest| rest)
        .trim();

    if rest.is_empty() {
        return None;
    }

    let name = if rest.starts_with('(') {
        rest.split_once(") ").map_or(rest, |(_, name)| name)
    } else {
        rest
    };

    Some(name.trim().to_string())
}

/// `NavHaz  : 5% (Mines)`
#[must_use]
pub fn parse_nav_haz(line: &str) -> Option<i64> {
    let rest = line.strip_prefix("NavHaz  :")?.trim_start();
    parse_number(rest.split('%').next()?)
}

/// One line of a relative density scan, e.g.
/// `Sector ( 500) ==>  100     Warps : 3    NavHaz :     0%    Anom : Yes`.
#[must_use]
pub fn parse_density_line(line: &str) -> Option<(i64, i64, i64, i64, bool)> {
    fn number(input: &str) -> IResult<&str, &str> {
        take_while1(|c: char| c.is_ascii_digit() || c == ',')(input)
    }

    let sector_field = alt((
        delimited(
            tuple((char('('), multispace0)),
            number,
            tuple((multispace0, char(')'))),
        ),
        number,
    ));

    let parser = tuple((
        tag("Sector"),
        multispace1,
        sector_field,
        multispace0,
        tag("==>"),
        multispace0,
        number,
        multispace1,
        tag("Warps :"),
        multispace0,
        number,
        multispace1,
        tag("NavHaz :"),
        multispace0,
        number,
        char('%'),
        multispace1,
        tag("Anom :"),
        multispace0,
        alt((tag("Yes"), tag("No"))),
    ));

    let (_, (_, _, sector, _, _, _, density, _, _, _, warps, _, _, _, nav_haz, _, _, _, _, anomaly)) =
        map(parser, |fields| fields)(line.trim_start()).ok()?;

    Some((
        parse_number(sector)?,
        parse_number(density)?,
        parse_number(warps)?,
        parse_number(nav_haz)?,
        anomaly == "Yes",
    ))
}

/// A plotted course, e.g. `2 > 7 > (49) > (50)`.
#[must_use]
pub fn parse_warp_chain(line: &str) -> Option<Vec<i64>> {
    let trimmed = line.trim();
    if !trimmed.contains('>') {
        return None;
    }

    let mut chain = Vec::new();
    for hop in trimmed.split('>') {
        let cleaned = hop.trim().trim_matches(|c| matches!(c, '(' | ')'));
        if cleaned.is_empty() {
            continue;
        }
        chain.push(parse_number(cleaned)?);
    }

    (chain.len() >= 2).then_some(chain)
}

/// `Show today's log? (Y/N)`-style command prompt carrying the player's
/// sector, e.g. `Command [TL=00:00:00]:[242] (?=Help)? : `.
#[must_use]
pub fn parse_command_prompt(text: &str) -> Option<i64> {
    let rest = text
        .strip_prefix("Command [TL=")
        .or_else(|| text.strip_prefix("Computer command [TL="))?;

    let after = &rest[rest.find("]:[")? + 3..];
    parse_number(&after[..after.find(']')?])
}
