//! ReadWriteDao - the generic DAO over one collection.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::read::AggregateStream;
use super::{DaoOptions, Operation, OperationLogger, ReadDao, SearchQuery, WriteDao};
use crate::config::DaoConfig;
use crate::error::{DaoError, DaoResult, StoreError, WriteError, WriteErrorKind};
use crate::filter::{CriteriaFilterBuilder, DaoFilter, FilterBuilder, SearchFilter};
use crate::model::{from_document, to_document, Model, URI_FIELD};
use crate::pagination::{ListWithPagination, PaginatedSearchStrategy, StreamWithPagination};
use crate::query::{
    Accumulator, Direction, Document, Expr, Filter, OrderBy, Pipeline, Projection, Sort, Stage,
    ID_FIELD,
};
use crate::store::{CountOptions, Cursor, DocumentStore, FindOptions, IndexSpec};
use crate::transaction::with_transaction;
use crate::uri::{generation, Namespaces, Uri};

/// Generic DAO for models of type `M` stored in `M::COLLECTION`.
///
/// Holds a handle on the store (stores are cheap clones sharing state), the
/// shared configuration and the filter builder used to compile `F`.
pub struct ReadWriteDao<S, M, F = SearchFilter>
where
    S: DocumentStore,
    M: Model,
    F: DaoFilter,
{
    store: S,
    config: Arc<DaoConfig>,
    options: DaoOptions,
    builder: Box<dyn FilterBuilder<F>>,
    create_prefix: String,
    logger: OperationLogger,
    _model: PhantomData<fn() -> M>,
}

impl<S, M, F> ReadWriteDao<S, M, F>
where
    S: DocumentStore,
    M: Model,
    F: DaoFilter,
{
    /// DAO compiling only the generic criteria of `F`.
    pub fn new(store: S, config: Arc<DaoConfig>, options: DaoOptions) -> DaoResult<Self> {
        let builder = CriteriaFilterBuilder::new(config.namespaces.clone());
        Self::with_builder(store, config, options, Box::new(builder))
    }

    /// DAO compiling `F` with a domain-specific builder. Declared indexes are
    /// created before this returns.
    pub fn with_builder(
        store: S,
        config: Arc<DaoConfig>,
        options: DaoOptions,
        builder: Box<dyn FilterBuilder<F>>,
    ) -> DaoResult<Self> {
        config.validate()?;
        let path = options.uri_path.as_deref().unwrap_or(M::COLLECTION);
        let create_prefix = generation::collection_prefix(&config.generation_prefix, path);
        let dao = Self {
            store,
            config,
            options,
            builder,
            create_prefix,
            logger: OperationLogger::new(M::COLLECTION),
            _model: PhantomData,
        };
        dao.ensure_indexes()?;
        Ok(dao)
    }

    fn ensure_indexes(&self) -> DaoResult<()> {
        let uri_index = IndexSpec::ascending(&[URI_FIELD]).unique();
        for index in std::iter::once(&uri_index).chain(&self.options.indexes) {
            self.logger.run(Operation::CreateIndex, &index.name, || {
                Ok(self.store.create_index(M::COLLECTION, index)?)
            })?;
        }
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &DaoConfig {
        &self.config
    }

    pub fn options(&self) -> &DaoOptions {
        &self.options
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.config.namespaces
    }

    /// Prefix of generated uris.
    pub fn create_prefix(&self) -> &str {
        &self.create_prefix
    }

    pub fn logger(&self) -> &OperationLogger {
        &self.logger
    }

    /// Compile `filter` into a store query, constraints included.
    pub fn compile(&self, filter: &F) -> DaoResult<Filter> {
        self.builder.compile(filter)
    }

    /// Equality on the expanded uri.
    pub fn uri_filter(&self, uri: &Uri) -> Filter {
        Filter::eq(URI_FIELD, self.namespaces().expand(uri))
    }

    fn find_options(&self) -> FindOptions {
        FindOptions::default().max_time(self.config.read_timeout())
    }

    fn sort_for(&self, filter: &SearchFilter) -> Sort {
        if filter.order_by().is_empty() {
            self.options.default_sort.clone()
        } else {
            filter.order_by().clone()
        }
    }

    /// Count limit of a paginated search: enough to report a few pages ahead,
    /// bounded by the scan limit.
    fn search_count_options(&self, skip: u64, page_size: u64) -> CountOptions {
        let limit = if page_size < self.config.max_count_limit {
            skip.saturating_add(page_size.saturating_mul(self.config.max_page_count_limit))
        } else {
            page_size
        };
        CountOptions::default()
            .limit(limit.min(self.config.max_count_scan))
            .max_time(self.config.read_timeout())
    }

    fn first(
        &self,
        session: Option<&S::Session>,
        filter: &Filter,
        options: FindOptions,
    ) -> DaoResult<Option<Document>> {
        let mut cursor = self
            .store
            .find(session, M::COLLECTION, filter, &options.limit(1))?;
        Ok(cursor.next().transpose()?)
    }

    fn contains_uri(&self, session: Option<&S::Session>, uri: &Uri) -> DaoResult<bool> {
        let options = self.find_options().projection(Projection::id_only());
        Ok(self.first(session, &self.uri_filter(uri), options)?.is_some())
    }

    /// Set the final uri of `model`: expanded when provided, generated otherwise.
    /// Uris in `taken` count as used.
    fn resolve_uri(
        &self,
        session: Option<&S::Session>,
        model: &mut M,
        taken: &HashSet<Uri>,
    ) -> DaoResult<Uri> {
        let check = self.options.check_uri_existence;

        if let Some(uri) = model.uri() {
            let uri = self.namespaces().expand(uri);
            if check && (taken.contains(&uri) || self.contains_uri(session, &uri)?) {
                return Err(DaoError::AlreadyExists {
                    collection: M::COLLECTION.into(),
                    uri: uri.into_string(),
                });
            }
            model.set_uri(uri.clone());
            return Ok(uri);
        }

        let attempts = self.config.uri_generation_max_attempts;
        for retry in 0..attempts {
            let candidate = model.generate_uri(&self.create_prefix, retry)?;
            if taken.contains(&candidate) {
                continue;
            }
            if check && self.contains_uri(session, &candidate)? {
                continue;
            }
            model.set_uri(candidate.clone());
            return Ok(candidate);
        }
        Err(DaoError::UriGenerationExhausted {
            collection: M::COLLECTION.into(),
            attempts,
        })
    }

    /// Surface unique index violations as `DuplicateKey`.
    fn write_error(&self, err: StoreError) -> DaoError {
        match err {
            StoreError::DuplicateKey { .. } => DaoError::DuplicateKey {
                collection: M::COLLECTION.into(),
                errors: vec![WriteError {
                    index: 0,
                    kind: WriteErrorKind::DuplicateKey,
                    message: err.to_string(),
                }],
            },
            StoreError::BulkWrite { errors, .. }
                if errors.iter().any(|e| e.kind == WriteErrorKind::DuplicateKey) =>
            {
                DaoError::DuplicateKey {
                    collection: M::COLLECTION.into(),
                    errors,
                }
            }
            other => DaoError::Store(other),
        }
    }

    fn model_document(&self, model: &M) -> DaoResult<(Uri, Document)> {
        let mut model = model.clone();
        model.expand_uris(self.namespaces());
        let uri = model.uri().cloned().ok_or_else(|| {
            DaoError::InvalidArgument(format!("{} model has no uri", M::COLLECTION))
        })?;
        let mut document = to_document(&model)?;
        document.insert(URI_FIELD.into(), Value::from(&uri));
        Ok((uri, document))
    }

    fn find_cursor(
        &self,
        session: Option<&S::Session>,
        filter: &Filter,
        search: &SearchFilter,
        projection: Option<Projection>,
        limit: u64,
    ) -> DaoResult<Cursor> {
        let options = FindOptions {
            sort: self.sort_for(search),
            skip: search.skip()?,
            limit: Some(limit),
            projection,
            max_time: Some(self.config.read_timeout()),
        };
        Ok(self.store.find(session, M::COLLECTION, filter, &options)?)
    }

    fn invalid_uri(uri: &Uri) -> DaoError {
        DaoError::InvalidUri {
            collection: M::COLLECTION.into(),
            uri: uri.to_string(),
        }
    }
}

fn deserialize_value<T: DeserializeOwned>(value: Value) -> DaoResult<T> {
    Ok(serde_json::from_value(value)?)
}

impl<S, M, F> ReadDao<M, F> for ReadWriteDao<S, M, F>
where
    S: DocumentStore,
    M: Model,
    F: DaoFilter,
{
    type Session = S::Session;

    fn get_in(&self, session: Option<&S::Session>, uri: &Uri) -> DaoResult<M> {
        self.logger.run(Operation::FindOne, uri, || {
            match self.first(session, &self.uri_filter(uri), self.find_options())? {
                Some(document) => from_document(document),
                None => Err(Self::invalid_uri(uri)),
            }
        })
    }

    fn get_projected(
        &self,
        session: Option<&S::Session>,
        uri: &Uri,
        projection: &Projection,
    ) -> DaoResult<M> {
        self.logger.run(Operation::FindOne, uri, || {
            let options = self.find_options().projection(projection.clone());
            match self.first(session, &self.uri_filter(uri), options)? {
                Some(document) => from_document(document),
                None => Err(Self::invalid_uri(uri)),
            }
        })
    }

    fn find_by_uris(&self, uris: &[Uri], size: usize) -> DaoResult<Vec<M>> {
        if size == 0 {
            return Err(DaoError::InvalidArgument("size must be greater than 0".into()));
        }
        let uris = self.namespaces().expand_all(uris.iter().take(size));
        let filter = Filter::is_in(URI_FIELD, uris);
        self.logger.run(Operation::Search, &filter, || {
            let options = self.find_options().limit(size as u64);
            self.store
                .find(None, M::COLLECTION, &filter, &options)?
                .map(|document| from_document::<M>(document?))
                .collect()
        })
    }

    fn exists_in(&self, session: Option<&S::Session>, uri: &Uri) -> DaoResult<bool> {
        self.contains_uri(session, uri)
    }

    fn count(&self, filter: &F) -> DaoResult<u64> {
        let options = CountOptions::default()
            .limit(self.config.max_count_limit)
            .max_time(self.config.read_timeout());
        self.count_with(None, filter, options)
    }

    fn count_with(
        &self,
        session: Option<&S::Session>,
        filter: &F,
        options: CountOptions,
    ) -> DaoResult<u64> {
        let scanned = options.skip.saturating_add(options.limit.unwrap_or(0));
        if scanned > self.config.max_count_scan {
            return Err(DaoError::InvalidArgument(format!(
                "count would scan {scanned} documents, more than the maximum of {}",
                self.config.max_count_scan
            )));
        }
        let compiled = self.compile(filter)?;
        self.logger.run(Operation::Count, &compiled, || {
            // Metadata count only outside transactions: it cannot see staged writes.
            if compiled.is_empty() && options.limit.is_none() && options.skip == 0 && session.is_none() {
                return Ok(self
                    .store
                    .estimated_document_count(M::COLLECTION, options.max_time)?);
            }
            Ok(self
                .store
                .count_documents(session, M::COLLECTION, &compiled, &options)?)
        })
    }

    fn search_with<T, C>(
        &self,
        query: SearchQuery<'_, S::Session, F, C>,
    ) -> DaoResult<ListWithPagination<T>>
    where
        C: Fn(M) -> T,
    {
        let search = query.filter.search();
        search.validate_pagination(self.config.max_page_size)?;
        let (page, page_size) = (search.page(), search.page_size());
        let compiled = self.compile(query.filter)?;

        match query.strategy {
            PaginatedSearchStrategy::CountQueryBeforeSearch => {
                let count_options = query
                    .count_options
                    .unwrap_or_else(|| self.search_count_options(search.skip().unwrap_or(0), page_size));
                let total = self.count_with(query.session, query.filter, count_options)?;
                if total == 0 {
                    return Ok(ListWithPagination::counted(
                        Vec::new(),
                        page,
                        page_size,
                        0,
                        count_options.limit,
                    ));
                }

                let started = self.logger.start(Operation::Search, &compiled);
                let items = self
                    .find_cursor(query.session, &compiled, search, query.projection, page_size)
                    .and_then(|cursor| {
                        cursor
                            .map(|document| from_document::<M>(document?).map(&query.convert))
                            .collect::<DaoResult<Vec<T>>>()
                    });
                match items {
                    Ok(items) => {
                        self.logger
                            .ok_with_count(Operation::Search, started, &compiled, items.len() as u64);
                        Ok(ListWithPagination::counted(
                            items,
                            page,
                            page_size,
                            total,
                            count_options.limit,
                        ))
                    }
                    Err(err) => {
                        self.logger.error(Operation::Search, started, &compiled, &err);
                        Err(err)
                    }
                }
            }
            PaginatedSearchStrategy::HasNextPage => {
                let mut items = self.logger.run(Operation::Search, &compiled, || {
                    self.find_cursor(
                        query.session,
                        &compiled,
                        search,
                        query.projection,
                        page_size.saturating_add(1),
                    )?
                    .map(|document| from_document::<M>(document?).map(&query.convert))
                    .collect::<DaoResult<Vec<T>>>()
                })?;
                let has_next_page = items.len() as u64 > page_size;
                items.truncate(page_size as usize);
                Ok(ListWithPagination::with_next_page(
                    items,
                    page,
                    page_size,
                    has_next_page,
                ))
            }
        }
    }

    /// Streams always count first, whatever the query's strategy.
    fn search_as_stream_with<T, C>(
        &self,
        query: SearchQuery<'_, S::Session, F, C>,
    ) -> DaoResult<StreamWithPagination<T>>
    where
        T: 'static,
        C: Fn(M) -> T + 'static,
    {
        let search = query.filter.search();
        search.validate_pagination(self.config.max_page_size)?;
        let (page, page_size) = (search.page(), search.page_size());
        let compiled = self.compile(query.filter)?;

        let count_options = query
            .count_options
            .unwrap_or_else(|| self.search_count_options(search.skip().unwrap_or(0), page_size));
        let total = self.count_with(query.session, query.filter, count_options)?;
        if total == 0 {
            return Ok(StreamWithPagination::empty(page, page_size));
        }

        let cursor = self.logger.run(Operation::SearchStream, &compiled, || {
            self.find_cursor(query.session, &compiled, search, query.projection, page_size)
        })?;
        let convert = query.convert;
        let items = cursor.map(move |document| -> DaoResult<T> {
            let model: M = from_document(document?)?;
            Ok(convert(model))
        });
        Ok(StreamWithPagination::new(
            Box::new(items),
            page,
            page_size,
            total,
        ))
    }

    fn distinct_uris(&self, filter: &F) -> DaoResult<HashSet<Uri>> {
        Ok(self
            .distinct::<Uri>(None, URI_FIELD, filter)?
            .into_iter()
            .collect())
    }

    fn distinct<T: DeserializeOwned>(
        &self,
        session: Option<&S::Session>,
        field: &str,
        filter: &F,
    ) -> DaoResult<Vec<T>> {
        let compiled = self.compile(filter)?;
        let values = self.logger.run(Operation::Distinct, &compiled, || {
            Ok(self.store.distinct(
                session,
                M::COLLECTION,
                field,
                &compiled,
                Some(self.config.read_timeout()),
            )?)
        })?;
        values.into_iter().map(deserialize_value).collect()
    }

    fn distinct_with_pagination<T: DeserializeOwned>(
        &self,
        session: Option<&S::Session>,
        field: &str,
        filter: &F,
    ) -> DaoResult<ListWithPagination<T>> {
        let search = filter.search();
        search.validate_pagination(self.config.max_page_size)?;
        let (page, page_size) = (search.page(), search.page_size());

        let direction = search
            .order_by()
            .keys()
            .first()
            .map_or(Direction::Asc, |key| key.direction);
        let compiled = Filter::and([self.compile(filter)?, Filter::exists(field, true)]);
        let pipeline = Pipeline::new()
            .then(Stage::Match(compiled))
            .then(Stage::Unwind(field.to_string()))
            .then(Stage::group_by(Expr::field(field)))
            .then(Stage::Sort(Sort::from(vec![OrderBy {
                field: ID_FIELD.into(),
                direction,
            }])))
            .then(Stage::Skip(search.skip()?))
            .then(Stage::Limit(page_size.saturating_add(1)));

        let mut values = self
            .aggregate(session, &pipeline)?
            .into_iter()
            .filter_map(|mut group| group.remove(ID_FIELD))
            .filter(|value| !value.is_null())
            .map(deserialize_value)
            .collect::<DaoResult<Vec<T>>>()?;
        let has_next_page = values.len() as u64 > page_size;
        values.truncate(page_size as usize);
        Ok(ListWithPagination::with_next_page(
            values,
            page,
            page_size,
            has_next_page,
        ))
    }

    fn aggregate(
        &self,
        session: Option<&S::Session>,
        pipeline: &Pipeline,
    ) -> DaoResult<Vec<Document>> {
        self.logger.run(Operation::Aggregate, pipeline, || {
            Ok(self
                .store
                .aggregate(
                    session,
                    M::COLLECTION,
                    pipeline,
                    Some(self.config.read_timeout()),
                )?
                .collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn aggregate_as<R: DeserializeOwned>(
        &self,
        session: Option<&S::Session>,
        pipeline: &Pipeline,
    ) -> DaoResult<Vec<R>> {
        self.aggregate(session, pipeline)?
            .into_iter()
            .map(|document| deserialize_value(Value::Object(document)))
            .collect()
    }

    fn aggregate_as_stream<R: DeserializeOwned + 'static>(
        &self,
        session: Option<&S::Session>,
        pipeline: &Pipeline,
    ) -> DaoResult<AggregateStream<R>> {
        let cursor = self.logger.run(Operation::Aggregate, pipeline, || {
            Ok(self.store.aggregate(
                session,
                M::COLLECTION,
                pipeline,
                Some(self.config.read_timeout()),
            )?)
        })?;
        Ok(Box::new(cursor.map(|document| {
            deserialize_value(Value::Object(document?))
        })))
    }

    fn lookup_aggregation<J, T>(
        &self,
        session: Option<&S::Session>,
        filter: Option<&F>,
        lookup_field: &str,
        lookup_collection: &str,
        convert: impl Fn(J) -> T,
    ) -> DaoResult<Vec<T>>
    where
        J: DeserializeOwned,
    {
        let reference = format!("{lookup_field}.{URI_FIELD}");
        let joined = format!("{lookup_field}_join");

        let mut clauses = vec![Filter::exists(reference.as_str(), true)];
        if let Some(filter) = filter {
            clauses.push(self.compile(filter)?);
        }

        let mut pipeline = Pipeline::new()
            .then(Stage::Match(Filter::and(clauses)))
            .then(Stage::Project(Projection::include([lookup_field])))
            .then(
                Stage::group_by(Expr::field(reference))
                    .accumulate("first", Accumulator::First(Expr::Root)),
            )
            .then(Stage::ReplaceRoot(Expr::field(format!("first.{lookup_field}"))))
            .then(Stage::Lookup {
                from: lookup_collection.into(),
                local_field: URI_FIELD.into(),
                foreign_field: URI_FIELD.into(),
                as_field: joined.clone(),
            })
            .then(Stage::Unwind(joined.clone()))
            .then(Stage::ReplaceRoot(Expr::field(joined)));
        if let Some(order_by) = filter.map(|f| f.search().order_by()) {
            if !order_by.is_empty() {
                pipeline.push(Stage::Sort(order_by.clone()));
            }
        }

        self.aggregate_as::<J>(session, &pipeline)
            .map(|items| items.into_iter().map(convert).collect())
    }
}

impl<S, M, F> WriteDao<M, F> for ReadWriteDao<S, M, F>
where
    S: DocumentStore,
    M: Model,
    F: DaoFilter,
{
    type Session = S::Session;

    fn create_in(&self, session: Option<&S::Session>, model: &mut M) -> DaoResult<Uri> {
        model.expand_uris(self.namespaces());
        let uri = self.resolve_uri(session, model, &HashSet::new())?;
        let document = to_document(model)?;
        self.logger.run(Operation::InsertOne, &uri, || {
            self.store
                .insert_one(session, M::COLLECTION, document)
                .map_err(|err| self.write_error(err))
        })?;
        Ok(uri)
    }

    fn create_many_in(
        &self,
        session: Option<&S::Session>,
        models: &mut [M],
    ) -> DaoResult<Vec<Uri>> {
        if models.is_empty() {
            return Err(DaoError::InvalidArgument("no models to create".into()));
        }

        let mut uris = Vec::with_capacity(models.len());
        let mut taken = HashSet::with_capacity(models.len());
        for model in models.iter_mut() {
            model.expand_uris(self.namespaces());
            let uri = if self.options.check_uri_generation {
                self.resolve_uri(session, model, &taken)?
            } else {
                let (uri, _) = self.model_document(model)?;
                model.set_uri(uri.clone());
                uri
            };
            taken.insert(uri.clone());
            uris.push(uri);
        }

        let documents = models
            .iter()
            .map(to_document)
            .collect::<DaoResult<Vec<_>>>()?;
        let detail = format!("{} documents", documents.len());
        self.logger.run(Operation::InsertMany, &detail, || {
            with_transaction(
                &self.store,
                session,
                self.config.transaction_max_retries,
                |session| {
                    self.store
                        .insert_many(Some(session), M::COLLECTION, documents.clone())
                        .map_err(|err| self.write_error(err))
                },
            )
        })?;
        Ok(uris)
    }

    fn update_in(&self, session: Option<&S::Session>, model: &M) -> DaoResult<()> {
        let (uri, document) = self.model_document(model)?;
        let previous = self.logger.run(Operation::UpdateOne, &uri, || {
            self.store
                .find_one_and_replace(
                    session,
                    M::COLLECTION,
                    &self.uri_filter(&uri),
                    document,
                    Some(&Projection::include([URI_FIELD])),
                )
                .map_err(|err| self.write_error(err))
        })?;
        match previous {
            Some(_) => Ok(()),
            None => Err(Self::invalid_uri(&uri)),
        }
    }

    fn upsert_in(&self, session: Option<&S::Session>, model: &M) -> DaoResult<bool> {
        let (uri, document) = self.model_document(model)?;
        let result = self.logger.run(Operation::UpsertOne, &uri, || {
            self.store
                .replace_one(session, M::COLLECTION, &self.uri_filter(&uri), document, true)
                .map_err(|err| self.write_error(err))
        })?;
        Ok(result.upserted_id.is_some())
    }

    fn delete_in(&self, session: Option<&S::Session>, uri: &Uri) -> DaoResult<()> {
        let deleted = self.logger.run(Operation::DeleteOne, uri, || {
            Ok(self
                .store
                .delete_one(session, M::COLLECTION, &self.uri_filter(uri))?)
        })?;
        if deleted == 0 {
            return Err(Self::invalid_uri(uri));
        }
        Ok(())
    }

    fn delete_many_uris(&self, session: Option<&S::Session>, uris: &[Uri]) -> DaoResult<u64> {
        if uris.is_empty() {
            return Err(DaoError::InvalidArgument("no uris to delete".into()));
        }
        let filter = Filter::is_in(URI_FIELD, self.namespaces().expand_all(uris));
        self.delete_matching(session, &filter)
    }

    fn delete_many(&self, session: Option<&S::Session>, filter: &F) -> DaoResult<u64> {
        let compiled = self.compile(filter)?;
        if compiled.is_empty() {
            return Err(DaoError::InvalidArgument(
                "delete_many requires at least one filter clause".into(),
            ));
        }
        self.delete_matching(session, &compiled)
    }
}

impl<S, M, F> ReadWriteDao<S, M, F>
where
    S: DocumentStore,
    M: Model,
    F: DaoFilter,
{
    fn delete_matching(&self, session: Option<&S::Session>, filter: &Filter) -> DaoResult<u64> {
        self.logger.run(Operation::DeleteMany, filter, || {
            with_transaction(
                &self.store,
                session,
                self.config.transaction_max_retries,
                |session| Ok(self.store.delete_many(Some(session), M::COLLECTION, filter)?),
            )
        })
    }
}
