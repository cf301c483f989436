use std::io;
use std::sync::{Arc, Mutex};

use nosql_dao::{DaoConfig, DaoOptions, InMemoryDocumentStore, Model, Namespaces, ReadWriteDao, Uri};
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Model)]
#[model(collection = "germplasm", uri_segment = "name")]
pub struct Germplasm {
    pub uri: Option<Uri>,
    pub rdf_type: Option<Uri>,
    pub name: String,
    pub species: String,
    pub year: i64,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub parents: Vec<Uri>,
}

impl Germplasm {
    pub fn new(name: &str, species: &str, year: i64) -> Self {
        Self {
            uri: None,
            rdf_type: None,
            name: name.into(),
            species: species.into(),
            year,
            synonyms: Vec::new(),
            parents: Vec::new(),
        }
    }

    pub fn accession(mut self) -> Self {
        self.rdf_type = Some(uri("test:Accession"));
        self
    }

    pub fn parents(mut self, parents: &[&str]) -> Self {
        self.parents = parents.iter().map(|p| uri(p)).collect();
        self
    }

    pub fn synonyms(mut self, synonyms: &[&str]) -> Self {
        self.synonyms = synonyms.iter().map(|s| s.to_string()).collect();
        self
    }
}

pub type GermplasmDao = ReadWriteDao<InMemoryDocumentStore, Germplasm>;

pub fn config() -> Arc<DaoConfig> {
    Arc::new(DaoConfig {
        generation_prefix: "http://test.org/id".into(),
        namespaces: Namespaces::new().with("test", "http://test.org/id/"),
        ..DaoConfig::default()
    })
}

pub fn dao_with(options: DaoOptions) -> GermplasmDao {
    ReadWriteDao::new(InMemoryDocumentStore::new(), config(), options).unwrap()
}

pub fn dao() -> GermplasmDao {
    dao_with(DaoOptions::default())
}

pub fn uri(value: &str) -> Uri {
    Uri::parse(value).unwrap()
}

/// Seeds a small catalog and returns the dao.
pub fn seeded() -> GermplasmDao {
    let dao = dao();
    let mut catalog = vec![
        Germplasm::new("B73", "zea mays", 1972).synonyms(&["b-73"]),
        Germplasm::new("Mo17", "zea mays", 1964),
        Germplasm::new("Chinese Spring", "triticum aestivum", 1920),
        Germplasm::new("Renan", "triticum aestivum", 1989).synonyms(&["ren"]),
        Germplasm::new("Nipponbare", "oryza sativa", 1963),
    ];
    nosql_dao::WriteDao::create_many(&dao, &mut catalog).unwrap();
    dao
}

/// Log sink for a scoped subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
