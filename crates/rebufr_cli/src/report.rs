//! The sectioned, human-readable message report printed by `dump`.

use std::fmt::Write as _;
use std::io::{Read, Seek};

use rebufr_decode::{Error, Expander, Message, MessageTables, PlanNode};

const LABEL_WIDTH: usize = 38;
const HEX_WIDTH: usize = 48;

pub fn render_message<R: Read + Seek>(
    message: &Message<R>,
    tables: Option<&MessageTables>,
) -> Result<String, Error> {
    let mut out = String::new();

    section_title(&mut out, 0);
    line(&mut out, "Length of Section 0 (bytes)", "8");
    line(
        &mut out,
        "Total Length of BUFR Message (bytes)",
        message.total_length(),
    );
    line(&mut out, "BUFR Edition Number", message.edition());

    section_title(&mut out, 1);
    line(&mut out, "Length of Section 1 (bytes)", message.section1_length());
    line(&mut out, "BUFR Master Table", message.master_table()?);
    line(&mut out, "Originating Center", message.originating_center()?);
    line(
        &mut out,
        "Originating Sub-Center",
        message.originating_subcenter()?,
    );
    line(
        &mut out,
        "Update Sequence Number",
        message.update_sequence_number()?,
    );
    line(
        &mut out,
        "Flag (Presence of Section 2)",
        message.has_section2(),
    );
    let category = match tables {
        Some(t) => message.data_category_description(t)?,
        None => None,
    };
    match category {
        Some(description) => line(&mut out, "BUFR Data Category", description),
        None => line(&mut out, "BUFR Data Category", message.data_category()?),
    }
    if let Some(sub) = message.international_sub_category()? {
        line(&mut out, "International Sub-Category", sub);
    }
    line(&mut out, "Local Sub-Category", message.local_sub_category()?);
    line(
        &mut out,
        "Version Number of Master Table",
        message.master_table_version()?,
    );
    line(
        &mut out,
        "Version Number of Local Table",
        message.local_table_version()?,
    );
    line(&mut out, "Year", message.year()?);
    line(&mut out, "Month", message.month()?);
    line(&mut out, "Day", message.day()?);
    line(&mut out, "Hour", message.hour()?);
    line(&mut out, "Minute", message.minute()?);
    line(&mut out, "Second", message.second()?);
    let local = message.section1_local_data()?;
    if !local.is_empty() {
        hex_block(&mut out, "Additional Section 1 Data", &local);
    }

    section_title(&mut out, 2);
    line(&mut out, "Length of Section 2 (bytes)", message.section2_length());
    let local = message.section2_local_data()?;
    if !local.is_empty() {
        hex_block(&mut out, "Optional Section 2 Data", &local);
    }

    section_title(&mut out, 3);
    line(&mut out, "Length of Section 3 (bytes)", message.section3_length());
    line(
        &mut out,
        "Number of Data Subsets",
        message.number_of_subsets()?,
    );
    line(&mut out, "Flag (Observed Data)", message.observed_data()?);
    line(&mut out, "Flag (Compressed Data)", message.compressed()?);

    let descriptors = message.descriptors()?;
    out.push_str("\nData Descriptors\n\n");
    let tokens: Vec<String> = descriptors.iter().map(ToString::to_string).collect();
    for chunk in tokens.chunks(5) {
        let _ = writeln!(out, "  {}", chunk.join("  "));
    }

    if let Some(tables) = tables {
        out.push_str("\nExpanded Descriptors\n\n");
        let plan = Expander::new(&tables.table_b, &tables.table_d).expand(&descriptors);
        if plan.is_empty() {
            out.push_str("  (nothing resolvable)\n");
        } else {
            render_plan(&mut out, &plan, 1);
        }
    }

    section_title(&mut out, 4);
    line(&mut out, "Length of Section 4 (bytes)", message.section4_length());
    hex_block(&mut out, "Section 4 Data", &message.payload()?);

    Ok(out)
}

fn render_plan(out: &mut String, plan: &[PlanNode<'_>], depth: usize) {
    let pad = "  ".repeat(depth);
    for node in plan {
        match node {
            PlanNode::Element(element) => {
                let mnemonic = element.mnemonic.as_deref().unwrap_or("-");
                let _ = write!(
                    out,
                    "{pad}{}  {:<10} {:>3} bits  {}",
                    element.descriptor, mnemonic, element.bit_width, element.unit
                );
                if let Some(name) = &element.name {
                    let _ = write!(out, "  {name}");
                }
                out.push('\n');
            }
            PlanNode::FixedReplication { count, body } => {
                let _ = writeln!(out, "{pad}replicate {count} times:");
                render_plan(out, body, depth + 1);
            }
            PlanNode::DelayedReplication {
                count_element,
                body,
            } => {
                let _ = writeln!(
                    out,
                    "{pad}replicate (count from {}):",
                    count_element.descriptor
                );
                render_plan(out, body, depth + 1);
            }
        }
    }
}

fn section_title(out: &mut String, section: u8) {
    let title = format!("BUFR Section {section}");
    let _ = writeln!(out, "\n{title:^50}\n");
}

fn line(out: &mut String, label: &str, value: impl ToString) {
    let value = value.to_string();
    let _ = writeln!(out, "{label:<LABEL_WIDTH$}{value:>12}");
}

fn hex_block(out: &mut String, title: &str, bytes: &[u8]) {
    let _ = writeln!(out, "\n{:=^50}", format!(" Begin {title} "));
    let hex: String = bytes.iter().map(|b| format!("{b:02x} ")).collect();
    let hex = hex.trim_end();
    for chunk in hex.as_bytes().chunks(HEX_WIDTH) {
        let _ = writeln!(out, "{}", String::from_utf8_lossy(chunk));
    }
    let _ = writeln!(out, "{:=^50}", format!(" End {title} "));
}
