//! Calendar date parsing for `Date32` columns (days since the Unix epoch).

use rowval_result::{Error, Result};
use time::{Date, Month};

fn epoch_julian_day() -> i32 {
    Date::from_calendar_date(1970, Month::January, 1)
        .expect("1970-01-01 is a valid date")
        .to_julian_day()
}

/// Parse a `YYYY-MM-DD` literal into days since the epoch.
pub fn parse_date32(text: &str) -> Result<i32> {
    let mut parts = text.split('-');
    let year_str = parts
        .next()
        .ok_or_else(|| Error::Syntax(format!("invalid DATE literal '{text}'")))?;
    let month_str = parts
        .next()
        .ok_or_else(|| Error::Syntax(format!("invalid DATE literal '{text}'")))?;
    let day_str = parts
        .next()
        .ok_or_else(|| Error::Syntax(format!("invalid DATE literal '{text}'")))?;
    if parts.next().is_some() {
        return Err(Error::Syntax(format!("invalid DATE literal '{text}'")));
    }

    let year = year_str
        .parse::<i32>()
        .map_err(|_| Error::Syntax(format!("invalid year in DATE literal '{text}'")))?;
    let month_num = month_str
        .parse::<u8>()
        .map_err(|_| Error::Syntax(format!("invalid month in DATE literal '{text}'")))?;
    let day = day_str
        .parse::<u8>()
        .map_err(|_| Error::Syntax(format!("invalid day in DATE literal '{text}'")))?;

    let month = Month::try_from(month_num)
        .map_err(|_| Error::Syntax(format!("invalid month in DATE literal '{text}'")))?;
    let date = Date::from_calendar_date(year, month, day)
        .map_err(|err| Error::Syntax(format!("invalid DATE literal '{text}': {err}")))?;
    Ok(date.to_julian_day() - epoch_julian_day())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_day_zero() {
        assert_eq!(parse_date32("1970-01-01").unwrap(), 0);
        assert_eq!(parse_date32("1970-01-02").unwrap(), 1);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(parse_date32("2024-13-01").is_err());
        assert!(parse_date32("2024-01").is_err());
        assert!(parse_date32("hello").is_err());
    }
}
