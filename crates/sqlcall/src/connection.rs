//! Connection handle.
//!
//! A [`Connection`] owns an environment handle and a connection handle
//! allocated from it. Both exist only while the connection is open:
//! `open()` allocates them in order and `close()` (or drop) releases them in
//! reverse order.

use crate::statement::Statement;
use sqlcall_core::diag::gather_diagnostics;
use sqlcall_core::{
    ConnectionConfig, ConnectionError, Driver, DriverCompletion, HandleType, ODBC_VERSION_3,
    Operation, RawHandle, Result, SqlReturn, StateErrorKind,
};

/// A single physical connection to a data source.
pub struct Connection<D: Driver> {
    driver: D,
    config: ConnectionConfig,
    env: RawHandle,
    dbc: RawHandle,
    open: bool,
}

impl<D: Driver> Connection<D> {
    /// Create a closed connection with a default configuration.
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, ConnectionConfig::default())
    }

    /// Create a closed connection with the given configuration.
    pub fn with_config(driver: D, config: ConnectionConfig) -> Self {
        Self {
            driver,
            config,
            env: RawHandle::NULL,
            dbc: RawHandle::NULL,
            open: false,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Mutable configuration; changes take effect on the next `open()`.
    pub fn config_mut(&mut self) -> &mut ConnectionConfig {
        &mut self.config
    }

    pub fn set_driver(&mut self, driver: impl Into<String>) {
        self.config.driver = driver.into();
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.config.host = host.into();
    }

    pub fn set_database_name(&mut self, database: impl Into<String>) {
        self.config.database = database.into();
    }

    pub fn set_user(&mut self, user: impl Into<String>) {
        self.config.user = user.into();
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.config.password = password.into();
    }

    /// Allocate the environment and connection handles and connect.
    ///
    /// Fails without touching any state if the connection is already open.
    /// On any other failure every handle allocated by this attempt is
    /// released before the error is returned.
    #[tracing::instrument(
        level = "debug",
        skip(self),
        fields(host = %self.config.host, database = %self.config.database)
    )]
    pub fn open(&mut self) -> Result<()> {
        if self.open {
            tracing::warn!("There is already an open connection");
            return Err(StateErrorKind::AlreadyOpen.into());
        }

        let connection_string = self.config.connection_string()?;

        let mut env = RawHandle::NULL;
        // SAFETY: a null parent is how environments are allocated.
        let rc = unsafe {
            self.driver
                .allocate_handle(HandleType::Environment, RawHandle::NULL, &mut env)
        };
        self.env = env;
        if !rc.succeeded() {
            let err = self.connection_error(
                Operation::AllocateEnvironment,
                HandleType::Environment,
                env,
                rc,
            );
            self.release_handles();
            return Err(err);
        }

        // SAFETY: env was just allocated.
        let rc = unsafe { self.driver.set_odbc_version(env, ODBC_VERSION_3) };
        if !rc.succeeded() {
            let err = self.connection_error(
                Operation::SetEnvironmentAttribute,
                HandleType::Environment,
                env,
                rc,
            );
            self.release_handles();
            return Err(err);
        }

        let mut dbc = RawHandle::NULL;
        // SAFETY: env is live and has its ODBC version set.
        let rc = unsafe {
            self.driver
                .allocate_handle(HandleType::Connection, env, &mut dbc)
        };
        self.dbc = dbc;
        if !rc.succeeded() {
            let err = self.connection_error(
                Operation::AllocateConnection,
                HandleType::Environment,
                env,
                rc,
            );
            self.release_handles();
            return Err(err);
        }

        tracing::debug!(
            connection_string = %self.config.redacted_connection_string(),
            "Connecting"
        );
        // SAFETY: dbc is live.
        let rc = unsafe {
            self.driver
                .driver_connect(dbc, &connection_string, DriverCompletion::Complete)
        };
        if !rc.succeeded() {
            let err = self.connection_error(Operation::Connect, HandleType::Connection, dbc, rc);
            self.release_handles();
            return Err(err);
        }

        self.open = true;
        tracing::debug!("Connection opened");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Disconnect and release both handles. Safe to call at any time.
    pub fn close(&mut self) {
        let was_open = self.open;
        self.release_handles();
        if was_open {
            tracing::debug!("Connection closed");
        }
    }

    /// The live connection handle, or null when closed. Do not free it.
    pub fn raw_handle(&self) -> RawHandle {
        self.dbc
    }

    /// Allocate a statement on this connection.
    pub fn statement(&self) -> Statement<'_, D> {
        Statement::new(self)
    }

    fn connection_error(
        &self,
        operation: Operation,
        handle_type: HandleType,
        handle: RawHandle,
        rc: SqlReturn,
    ) -> sqlcall_core::Error {
        // SAFETY: handle is null or one of our live handles.
        let diagnostics =
            unsafe { gather_diagnostics(&self.driver, handle_type, handle, operation, rc) };
        ConnectionError::from_diagnostics(operation, rc, diagnostics).into()
    }

    /// Disconnect (if connected), free the connection handle, then the
    /// environment handle. Leaves both null and the connection closed.
    fn release_handles(&mut self) {
        if !self.dbc.is_null() {
            if self.open {
                // SAFETY: dbc is live and connected.
                let rc = unsafe { self.driver.disconnect(self.dbc) };
                if !rc.succeeded() {
                    // Logged only; the handle is freed regardless.
                    // SAFETY: dbc is still live.
                    unsafe {
                        gather_diagnostics(
                            &self.driver,
                            HandleType::Connection,
                            self.dbc,
                            Operation::Disconnect,
                            rc,
                        );
                    }
                }
            }
            // SAFETY: dbc is live; it is nulled right after.
            let rc = unsafe { self.driver.free_handle(HandleType::Connection, self.dbc) };
            if !rc.succeeded() {
                tracing::warn!(ret = %rc, "Failed to free connection handle");
            }
            self.dbc = RawHandle::NULL;
        }
        if !self.env.is_null() {
            // SAFETY: env is live and its only child is gone.
            let rc = unsafe { self.driver.free_handle(HandleType::Environment, self.env) };
            if !rc.succeeded() {
                tracing::warn!(ret = %rc, "Failed to free environment handle");
            }
            self.env = RawHandle::NULL;
        }
        self.open = false;
    }
}

impl<D: Driver> Drop for Connection<D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<D: Driver> std::fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("env", &self.env)
            .field("dbc", &self.dbc)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}
