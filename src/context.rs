//! The PMI runtime context.
//!
//! A [`Pmi`] value is created once per process, after registration, and owns
//! everything PMI keeps per rank: the transport, the registry, the identity
//! allocator and the object table. The controller drives it through the
//! verbs `create`, `invoke`, `destroy` and `end_workers`; every worker runs
//! [`Pmi::worker_loop`], which replays the controller's commands against its
//! own registry and object table.
//!
//! Correctness rests on ordering alone: only the controller originates
//! commands, and broadcasts from one root arrive in the order they were
//! issued, so every worker observes the same command sequence and builds the
//! same id-indexed state without any state transfer.

use crate::coder::NameCoder;
use crate::config::PmiConfig;
use crate::error::{PmiError, Result};
use crate::ids::IdAllocator;
use crate::message::Communicator;
use crate::object_table::ObjectTable;
use crate::parallel::ParallelObject;
use crate::registry::{method_key, Handle, Registry};
use crate::transmit::Transmit;
use crate::types::{ClassId, Command, MethodId, ObjectId, Opcode, Role, Status};
use std::any::{type_name, Any};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info};

/// Where a worker is in its receive-dispatch cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the next command.
    Idle,
    /// Applying a received command.
    Dispatching,
    /// Received `End`; no further commands will arrive.
    Finished,
}

/// A summary of a rank's PMI state, for logging and for comparing ranks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub classes: usize,
    pub methods: usize,
    pub table_len: usize,
    pub live_objects: Vec<ObjectId>,
}

/// Runs a user callback, turning a panic into an error so the rank can
/// still take part in the status gather.
fn guarded<R, F: FnOnce() -> Result<R>>(f: F) -> Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let what = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(PmiError::Other(format!("callback panicked: {}", what)))
        }
    }
}

pub struct Pmi<C: Communicator> {
    transmit: Transmit<C>,
    config: PmiConfig,
    registry: Registry,
    ids: IdAllocator,
    objects: ObjectTable,
    workers_active: bool,
    state: WorkerState,
    broken: Option<(Status, String)>,
}

impl<C: Communicator> Pmi<C> {
    /// Creates the context for this rank. The registry must hold the same
    /// registrations on every rank.
    pub fn new(comm: C, config: PmiConfig, registry: Registry) -> Result<Self> {
        let transmit = Transmit::new(comm, config.controller_rank)?;
        debug!(
            rank = transmit.rank(),
            controller = config.controller_rank,
            check_status = config.check_status,
            "PMI context created"
        );
        Ok(Self {
            transmit,
            config,
            registry,
            ids: IdAllocator::new(),
            objects: ObjectTable::new(),
            workers_active: true,
            state: WorkerState::Idle,
            broken: None,
        })
    }

    pub fn role(&self) -> Role {
        if self.transmit.is_controller() {
            Role::Controller
        } else {
            Role::Worker(self.rank())
        }
    }

    pub fn is_controller(&self) -> bool {
        self.transmit.is_controller()
    }

    pub fn is_worker(&self) -> bool {
        !self.is_controller()
    }

    pub fn rank(&self) -> usize {
        self.transmit.rank()
    }

    pub fn size(&self) -> usize {
        self.transmit.comm().size()
    }

    pub fn config(&self) -> &PmiConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// False once `End` has been broadcast (controller) or received
    /// (worker).
    pub fn workers_active(&self) -> bool {
        self.workers_active
    }

    pub fn worker_state(&self) -> WorkerState {
        self.state
    }

    fn tagged(&self, err: PmiError) -> PmiError {
        let role = self.role();
        err.map_message(|m| format!("{} {}", role, m))
    }

    fn user_error(&self, what: String) -> PmiError {
        PmiError::User(format!("{} {}", self.role(), what))
    }

    fn require_controller(&self, action: &str) -> Result<()> {
        if self.is_worker() {
            return Err(self.user_error(format!("tries to {}", action)));
        }
        Ok(())
    }

    fn require_worker(&self, action: &str) -> Result<()> {
        if self.is_controller() {
            return Err(self.user_error(format!("tries to {}, which only workers do", action)));
        }
        Ok(())
    }

    fn require_workers_active(&self, action: &str) -> Result<()> {
        if !self.workers_active {
            return Err(self.user_error(format!(
                "tries to {}, but the workers have been terminated",
                action
            )));
        }
        Ok(())
    }

    /// Fails with the error that broke the group, if an association failed
    /// on some rank.
    fn require_unbroken(&self) -> Result<()> {
        match &self.broken {
            Some((status, what)) => Err(PmiError::from_status(*status, what.clone())),
            None => Ok(()),
        }
    }

    /// Remembers a failed association. The ranks no longer agree on the
    /// id-indexed tables, so every later verb would fail on some rank.
    fn mark_broken(&mut self, err: PmiError) -> PmiError {
        error!(rank = self.rank(), "association failed, only ending the workers is possible: {}", err);
        self.broken = Some((err.status(), err.message()));
        err
    }

    fn check_status(&self) -> Result<()> {
        if self.config.check_status {
            self.transmit.gather_status()
        } else {
            Ok(())
        }
    }

    fn class_name_of<T: Any>(&self) -> Result<String> {
        self.registry
            .class_name_of::<T>()
            .map(str::to_string)
            .ok_or_else(|| {
                self.user_error(format!(
                    "uses type {} which is not a registered class",
                    type_name::<T>()
                ))
            })
    }

    // ---- local operations, shared by controller and workers ----

    fn construct_local(&mut self, class_id: ClassId, object_id: ObjectId) -> Result<()> {
        let class = self.registry.class(class_id)?;
        self.objects.check_vacant(object_id)?;
        let handle: Handle = guarded(|| Ok(class.construct()))?;
        self.objects.insert(object_id, class_id, handle)
    }

    fn invoke_local(&mut self, class_id: ClassId, method_id: MethodId, object_id: ObjectId) -> Result<()> {
        let method = self.registry.method(method_id)?;
        let slot = self.objects.get_mut(object_id).ok_or_else(|| {
            PmiError::Internal(format!(
                "does not have an initialized object at object id {} (invoke)",
                object_id
            ))
        })?;
        if self.config.strict_class_check {
            if slot.class_id != class_id {
                return Err(PmiError::Internal(format!(
                    "has object id {} of class id {}, but the command names class id {}",
                    object_id, slot.class_id, class_id
                )));
            }
            let class = self.registry.class(class_id)?;
            if class.type_id() != method.class() {
                return Err(PmiError::Internal(format!(
                    "cannot invoke method \"{}\" on class \"{}\"",
                    method.name(),
                    class.name()
                )));
            }
        }
        let name = method.name();
        guarded(|| method.call(slot.handle.as_mut())).map_err(|e| {
            e.map_message(|m| {
                format!(
                    "failed to invoke method \"{}\" on object id {}: {}",
                    name, object_id, m
                )
            })
        })
    }

    fn destroy_local(&mut self, class_id: ClassId, object_id: ObjectId) -> Result<()> {
        let class = self.registry.class(class_id)?;
        match self.objects.get(object_id) {
            None => {
                return Err(PmiError::Internal(format!(
                    "does not have an initialized object at object id {} (destroy)",
                    object_id
                )))
            }
            Some(slot) if self.config.strict_class_check && slot.class_id != class_id => {
                return Err(PmiError::Internal(format!(
                    "has object id {} of class id {}, but the command names class id {}",
                    object_id, slot.class_id, class_id
                )))
            }
            Some(_) => {}
        }
        match self.objects.take(object_id) {
            Some(slot) => guarded(|| class.destruct(slot.handle)),
            None => Ok(()),
        }
    }

    // ---- controller verbs ----

    /// Agrees on an id for the class registered as `name`. The first call
    /// broadcasts the association; later calls return the same id without
    /// any communication.
    ///
    /// A failed association, such as a worker that never registered `name`,
    /// is fatal: every later verb except [`Pmi::end_workers`] returns the
    /// same error.
    pub fn associate_class(&mut self, name: &str) -> Result<ClassId> {
        self.require_controller(&format!("associate class \"{}\"", name))?;
        self.require_unbroken()?;
        if let Some(id) = self.registry.class_id(name) {
            return Ok(id);
        }
        self.require_workers_active(&format!("associate class \"{}\"", name))?;
        if !self.registry.is_class_registered(name) {
            return Err(self.user_error(format!("has not registered class \"{}\"", name)));
        }
        let id = self.ids.next_class_id();
        info!(rank = self.rank(), "Controller associates class \"{}\" with class id {}", name, id);
        self.registry
            .associate_class(name, id)
            .map_err(|e| self.tagged(e))?;
        self.transmit.broadcast_command(Command::AssociateClass {
            class_id: id,
            name_len: NameCoder::encoded_len(name),
        })?;
        self.transmit.broadcast_name(name)?;
        self.check_status().map_err(|e| self.mark_broken(e))?;
        Ok(id)
    }

    /// Agrees on an id for the method registered under the qualified name
    /// `key` (`Class::method`). Idempotent, like [`Pmi::associate_class`].
    pub fn associate_method(&mut self, key: &str) -> Result<MethodId> {
        self.require_controller(&format!("associate method \"{}\"", key))?;
        self.require_unbroken()?;
        if let Some(id) = self.registry.method_id(key) {
            return Ok(id);
        }
        self.require_workers_active(&format!("associate method \"{}\"", key))?;
        if !self.registry.is_method_registered(key) {
            return Err(self.user_error(format!("has not registered method \"{}\"", key)));
        }
        let id = self.ids.next_method_id();
        info!(rank = self.rank(), "Controller associates method \"{}\" with method id {}", key, id);
        self.registry
            .associate_method(key, id)
            .map_err(|e| self.tagged(e))?;
        self.transmit.broadcast_command(Command::AssociateMethod {
            method_id: id,
            name_len: NameCoder::encoded_len(key),
        })?;
        self.transmit.broadcast_name(key)?;
        self.check_status().map_err(|e| self.mark_broken(e))?;
        Ok(id)
    }

    /// Creates an instance of `T` on every rank.
    ///
    /// After the status gather either every rank holds a live instance at
    /// the returned id, or this call fails.
    pub fn create<T: Any>(&mut self) -> Result<ParallelObject<T>> {
        self.require_controller(&format!("create a parallel object of type {}", type_name::<T>()))?;
        let name = self.class_name_of::<T>()?;
        self.require_workers_active(&format!("create a parallel object of class \"{}\"", name))?;
        self.require_unbroken()?;

        let class_id = self.associate_class(&name)?;
        let object_id = self.ids.allocate_object();
        info!(
            rank = self.rank(),
            "Controller creates an instance of class \"{}\" (class id {}), object id is {}",
            name,
            class_id,
            object_id
        );
        self.transmit.broadcast_command(Command::Create {
            class_id,
            object_id,
        })?;
        let local = self.construct_local(class_id, object_id);
        self.check_status()?;
        local.map_err(|e| self.tagged(e))?;
        Ok(ParallelObject::new(object_id, class_id))
    }

    /// Runs the method registered as `method` on `T` against the instance
    /// `object` on every rank, the controller's own instance included.
    pub fn invoke<T: Any>(&mut self, object: &ParallelObject<T>, method: &str) -> Result<()> {
        let action = format!(
            "invoke method \"{}\" of parallel object id {}",
            method,
            object.id()
        );
        self.require_controller(&action)?;
        self.require_workers_active(&action)?;
        self.require_unbroken()?;
        let key = method_key(&self.class_name_of::<T>()?, method);
        let class_id = object.class_id();
        let method_id = self.associate_method(&key)?;
        info!(
            rank = self.rank(),
            "Controller invokes method \"{}\" (method id {}) of object id {} (class id {})",
            key,
            method_id,
            object.id(),
            class_id
        );
        self.transmit.broadcast_command(Command::Invoke {
            class_id,
            method_id,
            object_id: object.id(),
        })?;
        let local = self.invoke_local(class_id, method_id, object.id());
        self.check_status()?;
        local.map_err(|e| self.tagged(e))
    }

    /// Destroys the instance on every rank and frees its id.
    ///
    /// Once the workers have ended, only the controller's own instance is
    /// destroyed.
    pub fn destroy<T: Any>(&mut self, object: ParallelObject<T>) -> Result<()> {
        self.require_controller(&format!("destroy parallel object id {}", object.id()))?;
        let (class_id, object_id) = (object.class_id(), object.id());

        if !self.workers_active {
            debug!(
                rank = self.rank(),
                "Controller did not broadcast destroy message, as the workers are stopped"
            );
            let local = self.destroy_local(class_id, object_id);
            self.ids.free_object(object_id)?;
            return local.map_err(|e| self.tagged(e));
        }

        self.require_unbroken()?;
        info!(
            rank = self.rank(),
            "Controller destroys object id {} (class id {})", object_id, class_id
        );
        self.transmit.broadcast_command(Command::Destroy {
            class_id,
            object_id,
        })?;
        let local = self.destroy_local(class_id, object_id);
        let freed = self.ids.free_object(object_id);
        self.check_status()?;
        local.map_err(|e| self.tagged(e))?;
        freed
    }

    /// The controller's own instance behind `object`.
    pub fn local<T: Any>(&self, object: &ParallelObject<T>) -> Result<&T> {
        self.objects
            .get(object.id())
            .and_then(|slot| slot.handle.downcast_ref::<T>())
            .ok_or_else(|| {
                PmiError::Internal(format!(
                    "{} has no {} at object id {}",
                    self.role(),
                    type_name::<T>(),
                    object.id()
                ))
            })
    }

    pub fn local_mut<T: Any>(&mut self, object: &ParallelObject<T>) -> Result<&mut T> {
        let role = self.role();
        self.objects
            .get_mut(object.id())
            .and_then(|slot| slot.handle.downcast_mut::<T>())
            .ok_or_else(|| {
                PmiError::Internal(format!(
                    "{} has no {} at object id {}",
                    role,
                    type_name::<T>(),
                    object.id()
                ))
            })
    }

    /// Sends an object id to every worker, outside the create/invoke/destroy
    /// verbs. Workers pick it up with [`Pmi::receive_object_id`].
    pub fn broadcast_object_id(&self, id: ObjectId) -> Result<()> {
        self.require_controller("broadcast an object id")?;
        self.require_workers_active("broadcast an object id")?;
        self.require_unbroken()?;
        self.transmit.broadcast_object_id(id)
    }

    /// Stops every worker loop. No command can be issued afterwards.
    pub fn end_workers(&mut self) -> Result<()> {
        self.require_controller("end the workers")?;
        self.require_workers_active("end the workers")?;
        info!(rank = self.rank(), "Controller ends the workers");
        self.transmit.broadcast_command(Command::End)?;
        self.workers_active = false;
        self.check_status()
    }

    // ---- worker side ----

    /// Receives and applies commands until the controller ends the workers.
    /// On the controller this returns immediately, so every rank can call
    /// it from the same program text.
    pub fn worker_loop(&mut self) -> Result<()> {
        if self.is_controller() {
            return Ok(());
        }
        info!(rank = self.rank(), "Entering the worker loop");
        while self.handle_next()? {}
        info!(rank = self.rank(), "Leaving the worker loop");
        Ok(())
    }

    /// Receives and applies one command. Returns `false` once the command
    /// was `End`.
    ///
    /// Failures of the command itself are reported to the controller and
    /// do not surface here; only a broken transport or a misuse of this
    /// call returns `Err`.
    pub fn handle_next(&mut self) -> Result<bool> {
        Ok(self.step()? != Some(Opcode::End))
    }

    /// Like [`Pmi::handle_next`], but fails with a user error if the
    /// command was not `expected`. The command is applied either way, so
    /// the ranks stay in step.
    pub fn receive(&mut self, expected: Opcode) -> Result<()> {
        match self.step()? {
            Some(opcode) if opcode == expected => Ok(()),
            received => Err(self.user_error(format!(
                "received command {:?}, but expected {:?}",
                received, expected
            ))),
        }
    }

    /// Receives an object id sent with [`Pmi::broadcast_object_id`].
    pub fn receive_object_id(&self) -> Result<ObjectId> {
        self.require_worker("receive an object id")?;
        self.transmit.receive_object_id()
    }

    fn step(&mut self) -> Result<Option<Opcode>> {
        self.require_worker("handle a command")?;
        if self.state == WorkerState::Finished {
            return Err(self.user_error("tries to handle a command after the workers ended".into()));
        }
        let command = self.transmit.receive_command()?;
        self.state = WorkerState::Dispatching;
        let opcode = command.as_ref().ok().map(Command::opcode);

        let outcome = match command {
            Ok(command) => self.dispatch(command)?,
            Err(e) => Err(e),
        };
        let outcome = outcome.map_err(|e| self.tagged(e));
        if let Err(e) = &outcome {
            error!(rank = self.rank(), "{}", e);
        }
        if self.config.check_status {
            self.transmit.report(&outcome)?;
        }

        self.state = if opcode == Some(Opcode::End) {
            WorkerState::Finished
        } else {
            WorkerState::Idle
        };
        Ok(opcode)
    }

    /// Applies one command to this rank's registry and object table. The
    /// outer `Result` is the transport, the inner one the command.
    fn dispatch(&mut self, command: Command) -> Result<Result<()>> {
        let role = self.role();
        Ok(match command {
            Command::End => {
                info!(rank = self.rank(), "{} received end of workers", role);
                self.workers_active = false;
                Ok(())
            }
            Command::AssociateClass { class_id, name_len } => {
                match self.transmit.receive_name(name_len)? {
                    Ok(name) => {
                        info!(rank = self.rank(), "{} associates class \"{}\" to class id {}", role, name, class_id);
                        self.registry.associate_class(&name, class_id)
                    }
                    Err(e) => Err(e),
                }
            }
            Command::AssociateMethod {
                method_id,
                name_len,
            } => match self.transmit.receive_name(name_len)? {
                Ok(key) => {
                    info!(rank = self.rank(), "{} associates method \"{}\" to method id {}", role, key, method_id);
                    self.registry.associate_method(&key, method_id)
                }
                Err(e) => Err(e),
            },
            Command::Create {
                class_id,
                object_id,
            } => {
                info!(
                    rank = self.rank(),
                    "{} creates an instance of class id {}, object id is {}", role, class_id, object_id
                );
                self.construct_local(class_id, object_id)
            }
            Command::Invoke {
                class_id,
                method_id,
                object_id,
            } => {
                info!(
                    rank = self.rank(),
                    "{} invokes method id {} of object id {} of class id {}",
                    role,
                    method_id,
                    object_id,
                    class_id
                );
                self.invoke_local(class_id, method_id, object_id)
            }
            Command::Destroy {
                class_id,
                object_id,
            } => {
                info!(
                    rank = self.rank(),
                    "{} destroys object id {} of class id {}", role, object_id, class_id
                );
                self.destroy_local(class_id, object_id)
            }
        })
    }

    // ---- introspection ----

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            classes: self.registry.class_count(),
            methods: self.registry.method_count(),
            table_len: self.objects.len(),
            live_objects: self.objects.live_ids(),
        }
    }

    /// Logs this rank's snapshot.
    pub fn dump(&self) {
        let snapshot = self.snapshot();
        info!(
            rank = self.rank(),
            classes = snapshot.classes,
            methods = snapshot.methods,
            table_len = snapshot.table_len,
            "{} holds objects {:?}",
            self.role(),
            snapshot.live_objects
        );
    }
}

impl<C: Communicator> Drop for Pmi<C> {
    fn drop(&mut self) {
        if self.is_controller() && self.workers_active && self.config.end_workers_on_drop {
            if let Err(e) = self.end_workers() {
                error!(rank = self.rank(), "could not end the workers on drop: {}", e);
            }
        }
    }
}
