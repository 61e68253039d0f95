use chrono::NaiveDate;

/// One spreadsheet cell as delivered by the external reader.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Date(NaiveDate),
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(t) => t.trim().is_empty(),
            _ => false,
        }
    }

    /// True for the "not applicable / not yet recorded" sentinels, which are
    /// distinct from a real zero score.
    pub fn is_sentinel(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(t) => matches!(t.trim(), "" | "n" | "?"),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Text(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
            CellValue::Number(n) => Some(format!("{}", n)),
            _ => None,
        }
    }

    /// Raw value rendered the way it lands in `Assessment.score`.
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => format!("{}", n),
            CellValue::Text(t) => t.trim().to_string(),
            CellValue::Date(d) => d.to_string(),
        }
    }
}

/// Numeric coercion for sub-score cells. Sentinels and date-typed cells are
/// quietly absent; anything else that fails to coerce (or coerces to NaN)
/// is absent with a warning, never an error.
pub fn numeric_value(column: &str, value: &CellValue) -> Option<f64> {
    if value.is_sentinel() {
        return None;
    }
    match value {
        CellValue::Number(n) if n.is_nan() => {
            tracing::warn!("non-numeric value in column {}; treating as empty", column);
            None
        }
        CellValue::Number(n) => Some(*n),
        CellValue::Text(t) => match t.trim().parse::<f64>() {
            Ok(n) if !n.is_nan() => Some(n),
            _ => {
                tracing::warn!(
                    "non-numeric value {:?} in column {}; treating as empty",
                    t,
                    column
                );
                None
            }
        },
        CellValue::Date(_) => None,
        CellValue::Empty => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnFamily {
    /// EXTn: classwork / exercise progress.
    Ext,
    /// LNTn: board-solving participation.
    Lnt,
    /// NDn: homework, with ` K` comment and ` T` score companions.
    Nd,
    /// SDn: topic tests with P / MYP / C / C1 / C2 sub-columns.
    Sd,
    /// KDn: unit summatives; the Cambridge index is open-ended (C3, C4, ...).
    Kd,
    /// Dn: diagnostics.
    Diag,
    /// PDn with the assessment date embedded in the column name.
    Pd,
    /// Notebook-organization tracking.
    Tvark,
    /// Corrections-practice tracking.
    Tais,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnPart {
    /// ` K`: free-text comment for the same instance.
    Comment,
    /// ` T`: separately-scored homework component.
    Score,
    /// ` P`: percentage.
    Percentage,
    /// ` MYP`: MYP level.
    Myp,
    /// ` C` / ` C1` / ` C2` / ...: Cambridge sub-score; bare C is index 0.
    Cambridge(u32),
}

/// Structural descriptor for one classified column name. Ephemeral: used
/// only within a single row-processing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub family: ColumnFamily,
    pub instance: u32,
    pub part: Option<ColumnPart>,
    /// PD columns carry their own date, distinct from the header-row date.
    pub embedded_date: Option<NaiveDate>,
}

impl ColumnDescriptor {
    fn plain(family: ColumnFamily, instance: u32) -> Self {
        ColumnDescriptor {
            family,
            instance,
            part: None,
            embedded_date: None,
        }
    }

    /// Base column this descriptor's values fold into ("ND3", "SD1", ...).
    /// PD keys include the embedded date so repeats of the same practice
    /// assessment on different days stay distinct events.
    pub fn base_column(&self) -> String {
        match self.family {
            ColumnFamily::Ext => format!("EXT{}", self.instance),
            ColumnFamily::Lnt => format!("LNT{}", self.instance),
            ColumnFamily::Nd => format!("ND{}", self.instance),
            ColumnFamily::Sd => format!("SD{}", self.instance),
            ColumnFamily::Kd => format!("KD{}", self.instance),
            ColumnFamily::Diag => format!("D{}", self.instance),
            ColumnFamily::Pd => match self.embedded_date {
                Some(d) => format!("PD{}_{}", self.instance, d),
                None => format!("PD{}", self.instance),
            },
            ColumnFamily::Tvark => "TVARK".to_string(),
            ColumnFamily::Tais => "TAIS".to_string(),
        }
    }
}

/// Classify a column name against the closed pattern grammar. Total: names
/// outside the grammar return `None` and the caller decides (warn + skip,
/// or a legacy static mapping).
pub fn classify(raw: &str) -> Option<ColumnDescriptor> {
    let col = raw.trim();

    match col {
        "TVARK" => return Some(ColumnDescriptor::plain(ColumnFamily::Tvark, 0)),
        "TAIS" => return Some(ColumnDescriptor::plain(ColumnFamily::Tais, 0)),
        _ => {}
    }

    let (prefix, rest) = split_alpha_prefix(col)?;
    let (instance, rest) = split_digits(rest)?;

    match prefix {
        "EXT" if rest.is_empty() => Some(ColumnDescriptor::plain(ColumnFamily::Ext, instance)),
        "LNT" if rest.is_empty() => Some(ColumnDescriptor::plain(ColumnFamily::Lnt, instance)),
        "D" if rest.is_empty() => Some(ColumnDescriptor::plain(ColumnFamily::Diag, instance)),
        "ND" => {
            let part = match rest {
                "" => None,
                " K" => Some(ColumnPart::Comment),
                " T" => Some(ColumnPart::Score),
                _ => return None,
            };
            Some(ColumnDescriptor {
                family: ColumnFamily::Nd,
                instance,
                part,
                embedded_date: None,
            })
        }
        "SD" => {
            let part = match rest {
                "" => None,
                // SD caps its Cambridge index at two sub-scores.
                _ => Some(parse_part(rest, Some(2))?),
            };
            Some(ColumnDescriptor {
                family: ColumnFamily::Sd,
                instance,
                part,
                embedded_date: None,
            })
        }
        "KD" => {
            let part = match rest {
                "" => None,
                _ => Some(parse_part(rest, None)?),
            };
            Some(ColumnDescriptor {
                family: ColumnFamily::Kd,
                instance,
                part,
                embedded_date: None,
            })
        }
        "PD" => parse_pd_rest(instance, rest),
        _ => None,
    }
}

/// ` P` / ` MYP` / ` C<digits>` suffixes. `max_c_index` bounds the Cambridge
/// index where the family caps it (SD); `None` leaves it open (KD).
fn parse_part(rest: &str, max_c_index: Option<u32>) -> Option<ColumnPart> {
    let tag = rest.strip_prefix(' ')?;
    match tag {
        "P" => Some(ColumnPart::Percentage),
        "MYP" => Some(ColumnPart::Myp),
        "C" => Some(ColumnPart::Cambridge(0)),
        _ => {
            let digits = tag.strip_prefix('C')?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let index = digits.parse::<u32>().ok()?;
            if let Some(max) = max_c_index {
                if index > max {
                    return None;
                }
            }
            Some(ColumnPart::Cambridge(index))
        }
    }
}

/// PD remainder: optional ` P`/` MYP`/` C` tag, then `_` or ` ` and an ISO
/// date. A missing tag means the value is the Cambridge component.
fn parse_pd_rest(instance: u32, rest: &str) -> Option<ColumnDescriptor> {
    // Tagged forms first: a bare " 2025-10-21" also starts with a space, so
    // the tag probe has to win before the separator probe runs.
    let mut tagged: Option<(ColumnPart, &str)> = None;
    for (tag, part) in [
        (" MYP", ColumnPart::Myp),
        (" P", ColumnPart::Percentage),
        (" C", ColumnPart::Cambridge(0)),
    ] {
        if let Some(after) = rest.strip_prefix(tag) {
            if let Some(d) = strip_date_sep(after) {
                tagged = Some((part, d));
                break;
            }
        }
    }
    let (part, date_part) = match tagged {
        Some((part, d)) => (Some(part), d),
        None => (None, strip_date_sep(rest)?),
    };

    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some(ColumnDescriptor {
        family: ColumnFamily::Pd,
        instance,
        part,
        embedded_date: Some(date),
    })
}

fn strip_date_sep(s: &str) -> Option<&str> {
    s.strip_prefix('_').or_else(|| s.strip_prefix(' '))
}

fn split_alpha_prefix(s: &str) -> Option<(&str, &str)> {
    let end = s
        .bytes()
        .position(|b| !b.is_ascii_uppercase())
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    Some((&s[..end], &s[end..]))
}

fn split_digits(s: &str) -> Option<(u32, &str)> {
    let end = s.bytes().position(|b| !b.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let n = s[..end].parse::<u32>().ok()?;
    Some((n, &s[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn classifies_every_pattern_family() {
        let cases: Vec<(&str, ColumnFamily, u32, Option<ColumnPart>)> = vec![
            ("EXT1", ColumnFamily::Ext, 1, None),
            ("EXT12", ColumnFamily::Ext, 12, None),
            ("LNT3", ColumnFamily::Lnt, 3, None),
            ("ND4", ColumnFamily::Nd, 4, None),
            ("ND4 K", ColumnFamily::Nd, 4, Some(ColumnPart::Comment)),
            ("ND4 T", ColumnFamily::Nd, 4, Some(ColumnPart::Score)),
            ("SD2", ColumnFamily::Sd, 2, None),
            ("SD2 P", ColumnFamily::Sd, 2, Some(ColumnPart::Percentage)),
            ("SD2 MYP", ColumnFamily::Sd, 2, Some(ColumnPart::Myp)),
            ("SD2 C", ColumnFamily::Sd, 2, Some(ColumnPart::Cambridge(0))),
            ("SD1 C1", ColumnFamily::Sd, 1, Some(ColumnPart::Cambridge(1))),
            ("SD1 C2", ColumnFamily::Sd, 1, Some(ColumnPart::Cambridge(2))),
            ("KD1", ColumnFamily::Kd, 1, None),
            ("KD1 P", ColumnFamily::Kd, 1, Some(ColumnPart::Percentage)),
            ("KD1 C4", ColumnFamily::Kd, 1, Some(ColumnPart::Cambridge(4))),
            ("KD2 C12", ColumnFamily::Kd, 2, Some(ColumnPart::Cambridge(12))),
            ("D1", ColumnFamily::Diag, 1, None),
            ("TVARK", ColumnFamily::Tvark, 0, None),
            ("TAIS", ColumnFamily::Tais, 0, None),
        ];

        for (name, family, instance, part) in cases {
            let d = classify(name).unwrap_or_else(|| panic!("{} should classify", name));
            assert_eq!(d.family, family, "{}", name);
            assert_eq!(d.instance, instance, "{}", name);
            assert_eq!(d.part, part, "{}", name);
            assert_eq!(d.embedded_date, None, "{}", name);
        }
    }

    #[test]
    fn classifies_pd_with_embedded_date() {
        let d = classify("PD3_2025-10-21").expect("bare PD");
        assert_eq!(d.family, ColumnFamily::Pd);
        assert_eq!(d.instance, 3);
        assert_eq!(d.part, None);
        assert_eq!(d.embedded_date, Some(date("2025-10-21")));
        assert_eq!(d.base_column(), "PD3_2025-10-21");

        let d = classify("PD3 P_2025-10-21").expect("PD P");
        assert_eq!(d.part, Some(ColumnPart::Percentage));

        let d = classify("PD3 MYP 2025-10-21").expect("space separator");
        assert_eq!(d.part, Some(ColumnPart::Myp));

        let d = classify("PD3 C_2025-10-21").expect("PD C");
        assert_eq!(d.part, Some(ColumnPart::Cambridge(0)));
    }

    #[test]
    fn sd_cambridge_index_is_capped_but_kd_is_not() {
        assert_eq!(classify("SD1 C3"), None);
        assert!(classify("KD1 C3").is_some());
    }

    #[test]
    fn unknown_names_do_not_classify() {
        for name in ["", "banana", "EXT", "ND K", "SD2 X", "PD3", "PD3_not-a-date", "KONS1"] {
            assert_eq!(classify(name), None, "{:?}", name);
        }
    }

    #[test]
    fn sentinel_and_invalid_cells_have_no_numeric_value() {
        assert_eq!(numeric_value("SD1 P", &CellValue::Text("".into())), None);
        assert_eq!(numeric_value("SD1 P", &CellValue::Text("n".into())), None);
        assert_eq!(numeric_value("SD1 P", &CellValue::Text("?".into())), None);
        assert_eq!(numeric_value("SD1 P", &CellValue::Empty), None);
        assert_eq!(
            numeric_value("SD1 P", &CellValue::Date(date("2024-01-01"))),
            None
        );
        assert_eq!(numeric_value("SD1 P", &CellValue::Text("abc".into())), None);
        assert_eq!(numeric_value("SD1 P", &CellValue::Number(f64::NAN)), None);
        assert_eq!(
            numeric_value("SD1 P", &CellValue::Text("80".into())),
            Some(80.0)
        );
        assert_eq!(numeric_value("SD1 P", &CellValue::Number(0.0)), Some(0.0));
    }

    #[test]
    fn score_display_matches_sheet_values() {
        assert_eq!(CellValue::Number(80.0).display(), "80");
        assert_eq!(CellValue::Number(0.5).display(), "0.5");
        assert_eq!(CellValue::Text(" ok ".into()).display(), "ok");
    }
}
