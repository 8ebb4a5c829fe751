use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Context};
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use dirstore_index::{Dn2Id, IndexError, IndexResult};
use dirstore_storage::{AnyStorage, Backend, SequentialCursor, Storage, StorageConfig};
use dirstore_types::{Dn, EntryId, EntryIdAllocator, TreeName};

use crate::cli::*;

#[derive(Serialize)]
struct Mapping {
    dn: Dn,
    id: EntryId,
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let storage = build_storage(&cli)?;
    let index = open_index(&cli.base_dn, &cli.index)?;
    let format = cli.format;

    match cli.command {
        Command::Import(args) => cmd_import(&storage, &index, &args.input, format),
        Command::Get(args) => with_open(&storage, || cmd_get(&storage, &index, &args.dn, format)),
        Command::Put(args) => with_open(&storage, || cmd_put(&storage, &index, args, format)),
        Command::Remove(args) => {
            with_open(&storage, || cmd_remove(&storage, &index, &args.dn, format))
        }
        Command::Children(args) => with_open(&storage, || {
            cmd_list(&storage, &index, &args.dn, Scope::Children, format)
        }),
        Command::Subtree(args) => with_open(&storage, || {
            cmd_list(&storage, &index, &args.dn, Scope::Subtree, format)
        }),
        Command::Trees => with_open(&storage, || cmd_trees(&storage, format)),
        Command::Status => with_open(&storage, || cmd_status(&storage, format)),
    }
}

/// The index for `base_dn`. The tree is named after the normalized base DN,
/// so every spelling of one base DN reaches the same tree.
fn open_index(base_dn: &str, index: &str) -> anyhow::Result<Dn2Id> {
    let base_dn = Dn::parse(base_dn).context("invalid --base-dn")?;
    let tree = TreeName::new(base_dn.to_normalized_string(), index)
        .context("cannot name the index tree (base DN values must not contain '/')")?;
    Ok(Dn2Id::new(tree, base_dn))
}

fn build_storage(cli: &Cli) -> anyhow::Result<AnyStorage> {
    let mut config = match &cli.config {
        Some(path) => StorageConfig::load(path)?,
        None => StorageConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.backend = Backend::File;
        config.db_directory = db.clone();
    }
    if config.backend == Backend::Memory {
        eprintln!(
            "{} memory backend selected; nothing will be kept after this command",
            "warning:".yellow().bold()
        );
    }
    Ok(AnyStorage::from_config(&config)?)
}

/// Run `f` with the storage open, closing it afterwards even on failure.
fn with_open(
    storage: &AnyStorage,
    f: impl FnOnce() -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    storage.open()?;
    let result = f();
    storage.close()?;
    result
}

fn parse_dn(dn: &str) -> anyhow::Result<Dn> {
    Dn::parse(dn).with_context(|| format!("invalid DN {dn:?}"))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_get(storage: &AnyStorage, index: &Dn2Id, dn: &str, format: OutputFormat) -> anyhow::Result<()> {
    let dn = parse_dn(dn)?;
    let id = storage.read(|txn| index.get(txn, &dn))?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "dn": dn, "id": id })),
        OutputFormat::Text => {
            match id {
                Some(id) => println!("{} {}", id.to_string().yellow(), dn),
                None => println!("{} {}", "not found:".red(), dn),
            }
            Ok(())
        }
    }
}

fn cmd_put(storage: &AnyStorage, index: &Dn2Id, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let dn = parse_dn(&args.dn)?;
    let id = storage.write(|txn| -> anyhow::Result<EntryId> {
        let id = match args.id {
            Some(n) => EntryId::new(n)?,
            None => allocator_after(highest_id(index, &*txn)?)
                .allocate()
                .ok_or_else(|| anyhow!("entry ID space exhausted"))?,
        };
        index.put(txn, &dn, id)?;
        Ok(id)
    })?;
    match format {
        OutputFormat::Json => print_json(&Mapping { dn, id }),
        OutputFormat::Text => {
            println!("{} {} → {}", "✓".green().bold(), dn, id.to_string().yellow());
            Ok(())
        }
    }
}

fn cmd_remove(storage: &AnyStorage, index: &Dn2Id, dn: &str, format: OutputFormat) -> anyhow::Result<()> {
    let dn = parse_dn(dn)?;
    let removed = storage.write(|txn| index.remove(txn, &dn))?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "dn": dn, "removed": removed })),
        OutputFormat::Text => {
            if removed {
                println!("{} removed {}", "✓".green().bold(), dn);
            } else {
                println!("{} {}", "not found:".red(), dn);
            }
            Ok(())
        }
    }
}

#[derive(Clone, Copy)]
enum Scope {
    Children,
    Subtree,
}

fn cmd_list(
    storage: &AnyStorage,
    index: &Dn2Id,
    dn: &str,
    scope: Scope,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let dn = parse_dn(dn)?;
    let mappings = storage.read(|txn| -> IndexResult<Vec<Mapping>> {
        let mut cursor = match scope {
            Scope::Children => index.open_children_cursor(txn, &dn)?,
            Scope::Subtree => index.open_subordinates_cursor(txn, &dn)?,
        };
        let mut mappings = Vec::new();
        while cursor.next()? {
            if let (Some(dn), Some(&id)) = (cursor.dn()?, cursor.value()) {
                mappings.push(Mapping { dn, id });
            }
        }
        Ok(mappings)
    })?;

    match format {
        OutputFormat::Json => print_json(&mappings),
        OutputFormat::Text => {
            let base_depth = dn.size();
            for mapping in &mappings {
                let indent = match scope {
                    Scope::Children => 0,
                    Scope::Subtree => mapping.dn.size().saturating_sub(base_depth + 1),
                };
                println!(
                    "{:>8}  {}{}",
                    mapping.id.to_string().yellow(),
                    "  ".repeat(indent),
                    mapping.dn
                );
            }
            println!("{}", format!("{} entries", mappings.len()).dimmed());
            Ok(())
        }
    }
}

fn cmd_trees(storage: &AnyStorage, format: OutputFormat) -> anyhow::Result<()> {
    let trees = storage.list_trees()?;
    let named: Vec<String> = trees.iter().map(ToString::to_string).collect();
    match format {
        OutputFormat::Json => print_json(&named),
        OutputFormat::Text => {
            for (tree, name) in trees.iter().zip(&named) {
                let records = storage.read(|txn| txn.record_count(tree))?.unwrap_or(0);
                println!("{}  {} records", name.bold(), records);
            }
            Ok(())
        }
    }
}

fn cmd_status(storage: &AnyStorage, format: OutputFormat) -> anyhow::Result<()> {
    let status = storage.status()?;
    let backend = match storage.backend() {
        Backend::Memory => "memory",
        Backend::File => "file",
    };
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "backend": backend,
            "mode": format!("{:?}", status.mode),
            "trees": status.trees,
            "records": status.records,
        })),
        OutputFormat::Text => {
            println!("Backend: {}", backend.cyan());
            println!("Mode:    {:?}", status.mode);
            println!("Trees:   {}", status.trees.to_string().bold());
            println!("Records: {}", status.records.to_string().bold());
            Ok(())
        }
    }
}

/// Highest entry ID in the index, if any.
fn highest_id<T>(index: &Dn2Id, txn: &T) -> IndexResult<Option<EntryId>>
where
    T: dirstore_storage::ReadableTransaction + ?Sized,
{
    index
        .open_cursor(txn)?
        .ids()
        .try_fold(None, |max: Option<EntryId>, id| Ok::<_, IndexError>(max.max(Some(id?))))
}

fn allocator_after(highest: Option<EntryId>) -> EntryIdAllocator {
    highest.map_or_else(EntryIdAllocator::new, EntryIdAllocator::starting_after)
}

/// One line of an import file: `[id] dn`.
#[derive(Debug, PartialEq, Eq)]
struct ImportLine {
    id: Option<EntryId>,
    dn: Dn,
}

/// Parse an import line. Blank lines and `#` comments yield `None`.
fn parse_import_line(line: &str) -> anyhow::Result<Option<ImportLine>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if let Some((first, rest)) = line.split_once(char::is_whitespace) {
        if let Ok(n) = first.parse::<u64>() {
            return Ok(Some(ImportLine {
                id: Some(EntryId::new(n)?),
                dn: parse_dn(rest.trim())?,
            }));
        }
    }
    Ok(Some(ImportLine {
        id: None,
        dn: parse_dn(line)?,
    }))
}

fn read_import_lines(input: &Path) -> anyhow::Result<Vec<ImportLine>> {
    let reader: Box<dyn BufRead> = if input == Path::new("-") {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(input).with_context(|| format!("cannot open {}", input.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut lines = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if let Some(parsed) = parse_import_line(&line).with_context(|| format!("line {}", n + 1))? {
            lines.push(parsed);
        }
    }
    Ok(lines)
}

fn cmd_import(storage: &AnyStorage, index: &Dn2Id, input: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let lines = read_import_lines(input)?;

    // Bare DNs get IDs above everything already stored or listed explicitly.
    storage.open()?;
    let stored = storage.read(|txn| highest_id(index, txn));
    storage.close()?;
    let explicit = lines.iter().filter_map(|l| l.id).max();
    let allocator = allocator_after(stored?.max(explicit));

    // Resolve every ID and check every DN before importing: an importer that
    // is dropped part way still publishes what it was given.
    let mut imported = Vec::with_capacity(lines.len());
    for line in lines {
        let id = match line.id {
            Some(id) => id,
            None => allocator
                .allocate()
                .ok_or_else(|| anyhow!("entry ID space exhausted"))?,
        };
        index
            .codec()
            .encode(&line.dn)
            .with_context(|| format!("cannot import {}", line.dn))?;
        imported.push(Mapping { dn: line.dn, id });
    }

    let mut importer = storage.start_import()?;
    importer.create_tree(index.tree_name())?;
    for mapping in &imported {
        index.import(&mut *importer, &mapping.dn, mapping.id)?;
    }
    importer.finish()?;
    info!(entries = imported.len(), tree = %index.tree_name(), "import complete");

    match format {
        OutputFormat::Json => print_json(&imported),
        OutputFormat::Text => {
            println!(
                "{} imported {} entries into {}",
                "✓".green().bold(),
                imported.len().to_string().bold(),
                index.tree_name().to_string().cyan()
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    #[test]
    fn import_line_forms() {
        assert_eq!(parse_import_line("").unwrap(), None);
        assert_eq!(parse_import_line("  # comment").unwrap(), None);
        assert_eq!(
            parse_import_line("4 ou=People,dc=example,dc=com").unwrap(),
            Some(ImportLine {
                id: Some(EntryId::new(4).unwrap()),
                dn: dn("ou=People,dc=example,dc=com"),
            })
        );
        assert_eq!(
            parse_import_line("cn=John Smith,dc=example,dc=com").unwrap(),
            Some(ImportLine {
                id: None,
                dn: dn("cn=John Smith,dc=example,dc=com"),
            })
        );
        assert!(parse_import_line("0 dc=example,dc=com").is_err());
        assert!(parse_import_line("7 not a dn").is_err());
    }

    #[test]
    fn highest_id_scans_the_index() {
        let storage = AnyStorage::from_config(&StorageConfig::memory()).unwrap();
        storage.open().unwrap();
        let index = Dn2Id::new(
            TreeName::new("dc=example,dc=com", "dn2id").unwrap(),
            dn("dc=example,dc=com"),
        );
        assert_eq!(storage.read(|txn| highest_id(&index, txn)).unwrap(), None);

        storage
            .write(|txn| -> IndexResult<()> {
                index.put(txn, &dn("dc=example,dc=com"), EntryId::new(3).unwrap())?;
                index.put(txn, &dn("ou=a,dc=example,dc=com"), EntryId::new(11).unwrap())?;
                index.put(txn, &dn("ou=b,dc=example,dc=com"), EntryId::new(7).unwrap())
            })
            .unwrap();
        assert_eq!(
            storage.read(|txn| highest_id(&index, txn)).unwrap(),
            Some(EntryId::new(11).unwrap())
        );
    }

    #[test]
    fn base_dn_spellings_share_a_tree() {
        let lower = open_index("dc=example,dc=com", "dn2id").unwrap();
        let upper = open_index("DC=Example, DC=com", "dn2id").unwrap();
        assert_eq!(lower.tree_name(), upper.tree_name());

        let storage = AnyStorage::from_config(&StorageConfig::memory()).unwrap();
        storage.open().unwrap();
        let people = dn("ou=People,dc=example,dc=com");
        storage
            .write(|txn| lower.put(txn, &people, EntryId::new(2).unwrap()))
            .unwrap();
        assert_eq!(
            storage.read(|txn| upper.get(txn, &people)).unwrap(),
            Some(EntryId::new(2).unwrap())
        );

        assert!(open_index("o=a/b", "dn2id").is_err());
    }

    #[test]
    fn failed_import_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.txt");
        let bad = dir.path().join("bad.txt");
        std::fs::write(&good, "1 dc=example,dc=com
").unwrap();
        std::fs::write(
            &bad,
            "2 ou=People,dc=example,dc=com
             3 cn=foo,ou=People,dc=example,dc=com
             4 cn=x,o=elsewhere
",
        )
        .unwrap();

        let storage = AnyStorage::from_config(&StorageConfig::file(dir.path().join("db"))).unwrap();
        let index = open_index("dc=example,dc=com", "dn2id").unwrap();
        cmd_import(&storage, &index, &good, OutputFormat::Json).unwrap();
        let err = cmd_import(&storage, &index, &bad, OutputFormat::Json).unwrap_err();
        assert!(format!("{err:#}").contains("not under base DN"));

        storage.open().unwrap();
        let ids = storage
            .read(|txn| -> IndexResult<Vec<u64>> {
                index.open_cursor(txn)?.ids().map(|id| id.map(EntryId::get)).collect()
            })
            .unwrap();
        assert_eq!(ids, vec![1]);
        storage.close().unwrap();
    }

    #[test]
    fn import_then_list_children() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("entries.txt");
        std::fs::write(
            &input,
            "1 dc=example,dc=com\n\
             ou=People,dc=example,dc=com\n\
             cn=foo,ou=People,dc=example,dc=com\n\
             cn=bar,ou=People,dc=example,dc=com\n",
        )
        .unwrap();

        let storage = AnyStorage::from_config(&StorageConfig::file(dir.path().join("db"))).unwrap();
        let index = Dn2Id::new(
            TreeName::new("dc=example,dc=com", "dn2id").unwrap(),
            dn("dc=example,dc=com"),
        );
        cmd_import(&storage, &index, &input, OutputFormat::Json).unwrap();

        storage.open().unwrap();
        let children = storage
            .read(|txn| -> IndexResult<Vec<u64>> {
                index
                    .open_children_cursor(txn, &dn("ou=People,dc=example,dc=com"))?
                    .ids()
                    .map(|id| id.map(EntryId::get))
                    .collect()
            })
            .unwrap();
        // Bare DNs were numbered after the explicit ID, in file order.
        assert_eq!(children, vec![4, 3]);
        storage.close().unwrap();
    }
}
