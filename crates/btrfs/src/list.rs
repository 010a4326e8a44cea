//! Parser for the tabular output of `btrfs subvolume list -t`.

use uuid::Uuid;

use crate::error::ParseError;
use crate::vol::Vol;

/// Path prefix btrfs-progs prints for the filesystem tree root when
/// listing with `-a`.
pub const FS_TREE: &str = "<FS_TREE>";

/// Splits a tabular line into its non-empty, trimmed cells.
fn tab_split(line: &str) -> Vec<&str> {
    line.split('\t')
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .collect()
}

/// Maps the `-` placeholder to the nil uuid, otherwise parses the cell.
fn parse_uuid(cell: &str, line: usize) -> Result<Uuid, ParseError> {
    if cell == "-" {
        return Ok(Uuid::nil());
    }
    Uuid::parse_str(cell).map_err(|_| ParseError::Malformed {
        line,
        reason: format!("invalid uuid `{cell}`"),
    })
}

fn parse_number(cell: &str, column: &str, line: usize) -> Result<u64, ParseError> {
    cell.parse().map_err(|_| ParseError::Malformed {
        line,
        reason: format!("invalid {column} `{cell}`"),
    })
}

/// Parses the output of `btrfs subvolume list -a -u -q -R -t <mount>`.
///
/// The first line announces the columns, the second is a dash separator,
/// and every following line is one subvolume. Column positions come from
/// the header, so extra columns added by newer btrfs-progs are ignored; a
/// required column that is absent fails with
/// [`ParseError::MissingColumn`]. Empty uuids are printed as `-` and map
/// to the nil uuid. A `<FS_TREE>/` path prefix is stripped.
///
/// The returned records have `ro: false`; read-only eligibility comes
/// from a second, `-r`-filtered listing and is the caller's business.
///
/// # Errors
///
/// Returns a [`ParseError`] describing the first offending line.
///
/// # Examples
///
/// ```
/// use cowsync_btrfs::parse_list;
///
/// let out = "ID\tgen\tparent_uuid\treceived_uuid\tuuid\tpath\n\
///            --\t---\t-----------\t-------------\t----\t----\n\
///            256\t10\t-\t-\t11111111-1111-1111-1111-111111111111\thome\n";
/// let vols = parse_list(out).unwrap();
/// assert_eq!(vols.len(), 1);
/// assert_eq!(vols[0].path, "home");
/// assert!(vols[0].parent_uuid.is_nil());
/// ```
pub fn parse_list(output: &str) -> Result<Vec<Vol>, ParseError> {
    let mut lines = output.lines();

    let header = lines.next().ok_or(ParseError::Empty)?;
    let headers = tab_split(header);

    let separator = lines.next().ok_or(ParseError::Empty)?;
    if !separator.trim_start().starts_with('-') {
        return Err(ParseError::BadSeparator(separator.to_owned()));
    }

    let column = |name: &'static str| -> Result<usize, ParseError> {
        headers
            .iter()
            .position(|header| *header == name)
            .ok_or(ParseError::MissingColumn(name))
    };
    let id_col = column("ID")?;
    let gen_col = column("gen")?;
    let parent_uuid_col = column("parent_uuid")?;
    let received_uuid_col = column("received_uuid")?;
    let uuid_col = column("uuid")?;
    let path_col = column("path")?;

    let mut vols = Vec::new();
    for (offset, line) in lines.enumerate() {
        let line_no = offset + 3;
        if line.trim().is_empty() {
            continue;
        }
        let cells = tab_split(line);
        let cell = |col: usize| -> Result<&str, ParseError> {
            cells.get(col).copied().ok_or_else(|| ParseError::Malformed {
                line: line_no,
                reason: format!("expected at least {} columns, got {}", col + 1, cells.len()),
            })
        };

        let path = cell(path_col)?;
        let path = path
            .strip_prefix(FS_TREE)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(path);

        vols.push(Vol {
            id: parse_number(cell(id_col)?, "ID", line_no)?,
            gen: parse_number(cell(gen_col)?, "generation", line_no)?,
            uuid: parse_uuid(cell(uuid_col)?, line_no)?,
            parent_uuid: parse_uuid(cell(parent_uuid_col)?, line_no)?,
            received_uuid: parse_uuid(cell(received_uuid_col)?, line_no)?,
            path: path.to_owned(),
            ro: false,
        });
    }
    Ok(vols)
}

#[cfg(test)]
mod tests {
    use super::*;

    const U1: &str = "11111111-1111-1111-1111-111111111111";
    const U2: &str = "22222222-2222-2222-2222-222222222222";
    const U3: &str = "33333333-3333-3333-3333-333333333333";

    fn listing(rows: &[&str]) -> String {
        let mut out = String::from(
            "ID\tgen\ttop level\tparent_uuid\treceived_uuid\tuuid\tpath\n\
             --\t---\t---------\t-----------\t-------------\t----\t----\n",
        );
        for row in rows {
            out.push_str(row);
            out.push('\n');
        }
        out
    }

    #[test]
    fn parses_rows_with_placeholder_uuids() {
        let out = listing(&[
            &format!("256\t100\t5\t-\t-\t{U1}\thome"),
            &format!("257\t90\t5\t{U1}\t-\t{U2}\tsnapshots/home-daily"),
        ]);
        let vols = parse_list(&out).unwrap();

        assert_eq!(vols.len(), 2);
        assert_eq!(vols[0].id, 256);
        assert_eq!(vols[0].gen, 100);
        assert!(vols[0].parent_uuid.is_nil());
        assert!(vols[0].received_uuid.is_nil());
        assert_eq!(vols[0].uuid, Uuid::parse_str(U1).unwrap());
        assert_eq!(vols[1].parent_uuid, Uuid::parse_str(U1).unwrap());
        assert_eq!(vols[1].path, "snapshots/home-daily");
    }

    #[test]
    fn strips_fs_tree_prefix() {
        let out = listing(&[&format!("256\t1\t5\t-\t-\t{U1}\t<FS_TREE>/pool/data")]);
        let vols = parse_list(&out).unwrap();
        assert_eq!(vols[0].path, "pool/data");
    }

    #[test]
    fn tolerates_extra_columns() {
        let mut out = String::from(
            "ID\tgen\ttop level\tparent_uuid\treceived_uuid\tuuid\tpath\tflags\n\
             --\t---\t---------\t-----------\t-------------\t----\t----\t-----\n",
        );
        out.push_str(&format!("256\t1\t5\t-\t-\t{U1}\thome\textra\n"));
        let vols = parse_list(&out).unwrap();
        assert_eq!(vols[0].path, "home");
    }

    #[test]
    fn missing_required_column_fails_loudly() {
        let out = "ID\tgen\tpath\n--\t---\t----\n256\t1\thome\n";
        assert_eq!(
            parse_list(out),
            Err(ParseError::MissingColumn("parent_uuid"))
        );
    }

    #[test]
    fn missing_separator_is_rejected() {
        let out = format!(
            "ID\tgen\tparent_uuid\treceived_uuid\tuuid\tpath\n256\t1\t-\t-\t{U1}\thome\n"
        );
        assert!(matches!(parse_list(&out), Err(ParseError::BadSeparator(_))));
    }

    #[test]
    fn empty_listing_yields_no_volumes() {
        let out = listing(&[]);
        assert_eq!(parse_list(&out).unwrap(), Vec::new());
    }

    #[test]
    fn truncated_row_is_malformed() {
        let out = listing(&["256\t1"]);
        assert!(matches!(
            parse_list(&out),
            Err(ParseError::Malformed { line: 3, .. })
        ));
    }

    #[test]
    fn bad_uuid_is_malformed() {
        let out = listing(&["256\t1\t5\t-\t-\tnot-a-uuid\thome"]);
        assert!(matches!(
            parse_list(&out),
            Err(ParseError::Malformed { line: 3, .. })
        ));
    }

    /// Re-rendering parsed records and parsing again must preserve the
    /// semantic content, including the `-` placeholder mapping.
    #[test]
    fn round_trips_through_rendering() {
        let out = listing(&[
            &format!("256\t100\t5\t-\t-\t{U1}\thome"),
            &format!("257\t90\t5\t{U1}\t{U3}\t{U2}\tsnapshots/home-daily"),
        ]);
        let vols = parse_list(&out).unwrap();

        let rendered = listing(
            &vols
                .iter()
                .map(|v| {
                    let fmt = |u: &Uuid| {
                        if u.is_nil() {
                            "-".to_owned()
                        } else {
                            u.to_string()
                        }
                    };
                    format!(
                        "{}\t{}\t5\t{}\t{}\t{}\t{}",
                        v.id,
                        v.gen,
                        fmt(&v.parent_uuid),
                        fmt(&v.received_uuid),
                        fmt(&v.uuid),
                        v.path
                    )
                })
                .collect::<Vec<_>>()
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>(),
        );
        assert_eq!(parse_list(&rendered).unwrap(), vols);
    }
}
